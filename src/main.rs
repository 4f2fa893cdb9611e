use squash::cli::{Cli, Commands};
use squash::docker::daemon;
use squash::docker::{DockerImage, FromLayer};
use squash::error::SquashError;
use std::process;

fn main() {
    match run() {
        Ok(()) => {}
        Err(SquashError::SquashUnnecessary(msg)) => {
            // Nothing to do is not a failure: exit 0, no "Error:" prefix.
            println!("{}", msg);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn parse_name_tag(spec: &str) -> (String, String) {
    match spec.split_once(':') {
        Some((name, tag)) => (name.to_string(), tag.to_string()),
        None => (spec.to_string(), "latest".to_string()),
    }
}

fn run() -> Result<(), SquashError> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Squash {
            source,
            input_tar,
            from_layer,
            tag,
            message,
            cleanup,
            temp_dir,
            output_path,
            load_image,
            load,
            verbose,
        } => {
            let do_load = load_image || load.is_some();
            if output_path.is_none() && !do_load {
                return Err(SquashError::InvalidInput(
                    "Either --output-path or --load-image must be specified".to_string(),
                ));
            }

            let mut image = match (&source, &input_tar) {
                (Some(name), _) => {
                    if verbose {
                        println!("Exporting {} from the Docker daemon...", name);
                    }
                    DockerImage::from_image(name, temp_dir.as_deref(), verbose)?
                }
                (None, Some(path)) => {
                    if verbose {
                        println!("Loading image archive: {}", path.display());
                    }
                    DockerImage::from_archive(path, temp_dir.as_deref(), verbose)?
                }
                (None, None) => {
                    return Err(SquashError::InvalidInput(
                        "Either --source or --input-tar must be specified".to_string(),
                    ));
                }
            };

            if verbose {
                println!("Image loaded: {} layers", image.layers.len());
            }

            let selector = match &from_layer {
                Some(spec) => FromLayer::parse(spec),
                None => FromLayer::Count(image.layers.len()),
            };

            let name_tag = tag.as_deref().map(parse_name_tag);
            let tag_ref = name_tag.as_ref().map(|(n, t)| (n.as_str(), t.as_str()));

            image.squash_layers(&selector, tag_ref, message.as_deref(), temp_dir.as_deref())?;

            if image.is_empty_squash() && verbose {
                println!("Warning: squashed layers contributed no filesystem changes");
            }

            if let Some(path) = &output_path {
                if verbose {
                    println!("Writing squashed image to: {}", path.display());
                }
                image.save_to_file(path)?;
            }

            if do_load {
                if verbose {
                    println!("Loading squashed image into Docker...");
                }
                image.load_into_docker(load.as_deref())?;
            }

            if cleanup {
                if let Some(name) = &source {
                    if verbose {
                        println!("Removing source image: {}", name);
                    }
                    if let Err(e) = daemon::remove_image(name) {
                        eprintln!("Warning: failed to clean up {}: {}", name, e);
                    }
                }
            }

            println!("Image squashed successfully: {}", image.image_id().unwrap_or(""));
        }
    }

    Ok(())
}
