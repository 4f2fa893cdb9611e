//! The container runtime round-trip: `docker save`/`load`/`rmi` over the
//! local `docker` CLI, plus the environment variables that steer where it
//! points.
//!
//! Grounded on `docker_squash.image.Image._save_image` /
//! `_load_image`/`docker_squash/errors.py`: the original shells out to the
//! `docker-py` client rather than the CLI, but the retry shape (`for x in
//! [0, 1, 2]`, backing off between attempts) and the three environment
//! variables it reads are reproduced here exactly, just against
//! `std::process::Command` the way this crate already talks to Docker
//! elsewhere (`docker::image::DockerImage::export_image`).

use crate::error::{Result, SquashError};
use std::env;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// `DOCKER_HOST` (or its deprecated alias `DOCKER_CONNECTION`), if set.
/// Read so callers can log which daemon they're about to talk to; the
/// `docker` CLI itself also reads `DOCKER_HOST` from the environment, so no
/// extra plumbing is required to make it take effect.
pub fn docker_host() -> Option<String> {
    env::var("DOCKER_HOST")
        .ok()
        .or_else(|| env::var("DOCKER_CONNECTION").ok())
}

/// `DOCKER_TIMEOUT` in seconds, default 600.
pub fn docker_timeout() -> u64 {
    env::var("DOCKER_TIMEOUT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(600)
}

const SAVE_RETRY_ATTEMPTS: u32 = 3;

/// `docker save -o <output_path> <image_name>`, retried up to
/// [`SAVE_RETRY_ATTEMPTS`] times with exponential backoff before giving up.
/// All other daemon operations here are non-retrying, matching spec.md
/// §4.F's "Retries" note.
pub fn save_image(image_name: &str, output_path: &Path) -> Result<()> {
    let mut attempt = 0;
    loop {
        let output = Command::new("docker")
            .args(["save", "-o", &output_path.to_string_lossy(), image_name])
            .output()
            .map_err(|e| SquashError::DaemonUnavailable(format!("failed to run docker save: {}", e)))?;

        if output.status.success() {
            return Ok(());
        }

        attempt += 1;
        if attempt >= SAVE_RETRY_ATTEMPTS {
            return Err(SquashError::DaemonUnavailable(format!(
                "docker save failed after {} attempts: {}",
                attempt,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        std::thread::sleep(Duration::from_secs(1 << attempt));
    }
}

/// `docker load -i <archive_path>`. Not retried: a malformed archive will
/// never succeed on a second try.
pub fn load_image(archive_path: &Path) -> Result<()> {
    let output = Command::new("docker")
        .args(["load", "-i", &archive_path.to_string_lossy()])
        .output()
        .map_err(|e| SquashError::DaemonUnavailable(format!("failed to run docker load: {}", e)))?;

    if !output.status.success() {
        return Err(SquashError::DaemonUnavailable(format!(
            "docker load failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(())
}

/// `docker tag <source> <target>`.
pub fn tag_image(source: &str, target: &str) -> Result<()> {
    let output = Command::new("docker")
        .args(["tag", source, target])
        .output()
        .map_err(|e| SquashError::DaemonUnavailable(format!("failed to run docker tag: {}", e)))?;

    if !output.status.success() {
        return Err(SquashError::DaemonUnavailable(format!(
            "docker tag failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(())
}

/// `docker rmi <image>`, used both for `-c/--cleanup` and for discarding the
/// temporary tag `load_into_docker` creates. Failures here are reported but
/// not fatal to the overall operation — matching the teacher's existing
/// "Warning: Failed to clean up..." texture.
pub fn remove_image(image: &str) -> Result<()> {
    let output = Command::new("docker")
        .args(["rmi", image])
        .output()
        .map_err(|e| SquashError::DaemonUnavailable(format!("failed to run docker rmi: {}", e)))?;

    if !output.status.success() {
        return Err(SquashError::DaemonUnavailable(format!(
            "docker rmi failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(())
}

/// Stream a `docker save` response body straight through to `writer` without
/// buffering the whole image in memory: a reader thread pulls fixed-size
/// chunks off `reader` and hands them across a bounded channel, so the
/// writer side blocks the reader once a few chunks are in flight instead of
/// letting either side race ahead. Mirrors `image.py::_save_image`'s
/// `os.pipe()` + `threading.Thread` decoupling, generalized beyond the
/// image-export path this crate already has (`DockerImage::export_image`
/// always saves straight to a file because the CLI's `-o` flag streams to
/// disk on its own; this entry point is for a daemon client that hands back
/// a response body instead of a file path).
pub fn save_image_streaming<R, W>(mut reader: R, mut writer: W) -> Result<()>
where
    R: std::io::Read + Send,
    W: std::io::Write,
{
    use std::sync::mpsc::sync_channel;

    const CHUNK_SIZE: usize = 64 * 1024;
    let (tx, rx) = sync_channel::<std::io::Result<Vec<u8>>>(4);

    let read_handle = std::thread::spawn(move || {
        loop {
            let mut buf = vec![0u8; CHUNK_SIZE];
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    buf.truncate(n);
                    if tx.send(Ok(buf)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });

    for chunk in rx {
        writer.write_all(&chunk?)?;
    }

    read_handle
        .join()
        .map_err(|_| SquashError::Internal("pipe reader thread panicked".to_string()))?;

    Ok(())
}
