use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::vision::{self, DebugCameraArgs, DetectorCliArgs, DetectorConfig};

/// Watch a video source for fire and smoke with a vision-language model.
#[derive(Debug, Parser)]
#[command(name = "firewatch", version, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: DetectorCliArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the detector (the default when no subcommand is given).
    Run(DetectorCliArgs),
    /// Probe camera indices and stream the first working one.
    DebugCamera(DebugCameraArgs),
}

pub fn handle_commands(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Command::Run(args)) => vision::run(DetectorConfig::try_from(args)?),
        Some(Command::DebugCamera(args)) => {
            let _ = tracing_subscriber::fmt::try_init();
            vision::run_debug_camera(args)
        }
        None => vision::run(DetectorConfig::try_from(cli.run)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_runs_the_detector() {
        let cli = Cli::try_parse_from(["firewatch", "clip.mp4", "--frame-skip", "10"]).unwrap();
        assert!(cli.command.is_none());
        let config = DetectorConfig::try_from(cli.run).unwrap();
        assert_eq!(config.source, "clip.mp4");
        assert_eq!(config.frame_skip, 10);
    }

    #[test]
    fn subcommands_are_recognised() {
        let cli = Cli::try_parse_from(["firewatch", "run", "rtsp://cam/1"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Run(_))));

        let cli = Cli::try_parse_from(["firewatch", "debug-camera", "--max-index", "3"]).unwrap();
        assert!(matches!(cli.command, Some(Command::DebugCamera(_))));
    }
}
