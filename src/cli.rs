use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "squash")]
#[command(about = "A Docker/OCI image layer squashing tool")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Squash the trailing layers of an image into one new layer
    #[command(group(
        ArgGroup::new("source")
            .required(true)
            .args(["source", "input_tar"])
    ))]
    Squash {
        /// Image name:tag to export from the daemon before squashing
        #[arg(short, long)]
        source: Option<String>,

        /// Path to an already-exported image archive (mutually exclusive with --source)
        #[arg(long = "input-tar")]
        input_tar: Option<PathBuf>,

        /// Number of trailing layers to squash, or a layer id to squash from.
        /// Defaults to squashing every layer in the image.
        #[arg(short = 'f', long = "from-layer", visible_alias = "layers")]
        from_layer: Option<String>,

        /// Tag to apply to the squashed image: NAME[:TAG]
        #[arg(short, long)]
        tag: Option<String>,

        /// Comment to record in the squashed layer's history entry
        #[arg(short, long)]
        message: Option<String>,

        /// Remove the source image from the daemon after a successful squash
        #[arg(short, long)]
        cleanup: bool,

        /// Temporary directory for intermediate files. Implies the
        /// workspace is retained (not cleaned up) if squashing fails.
        #[arg(long = "tmp-dir")]
        temp_dir: Option<PathBuf>,

        /// Path to write the squashed image archive to
        #[arg(short, long = "output-path", alias = "output")]
        output_path: Option<PathBuf>,

        /// Load the squashed image into the Docker daemon
        #[arg(long = "load-image", default_value_t = true)]
        load_image: bool,

        /// Load result into Docker under this name:tag (shorthand for --load-image with a rename)
        #[arg(long)]
        load: Option<String>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_source_or_input_tar() {
        let args = vec!["squash", "squash", "--from-layer", "2"];
        let result = Cli::try_parse_from(args);
        assert!(result.is_err());
    }

    #[test]
    fn accepts_image_source() {
        let args = vec![
            "squash",
            "squash",
            "--source",
            "nginx:latest",
            "--from-layer",
            "3",
            "--output-path",
            "out.tar",
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Squash {
                source,
                output_path,
                from_layer,
                ..
            } => {
                assert_eq!(source.unwrap(), "nginx:latest");
                assert_eq!(from_layer.unwrap(), "3");
                assert_eq!(output_path.unwrap(), PathBuf::from("out.tar"));
            }
        }
    }

    #[test]
    fn accepts_input_tar_source() {
        let args = vec![
            "squash",
            "squash",
            "--input-tar",
            "image.tar",
            "--output-path",
            "out.tar",
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Squash {
                source, input_tar, ..
            } => {
                assert!(source.is_none());
                assert_eq!(input_tar.unwrap(), PathBuf::from("image.tar"));
            }
        }
    }

    #[test]
    fn default_load_image_is_true() {
        let args = vec![
            "squash",
            "squash",
            "--input-tar",
            "image.tar",
            "--output-path",
            "out.tar",
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Squash { load_image, .. } => assert!(load_image),
        }
    }

    #[test]
    fn rejects_both_source_and_input_tar() {
        let args = vec![
            "squash",
            "squash",
            "--source",
            "nginx:latest",
            "--input-tar",
            "image.tar",
            "--from-layer",
            "2",
        ];
        let result = Cli::try_parse_from(args);
        assert!(result.is_err());
    }
}
