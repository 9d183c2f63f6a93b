//! Command line arguments.

use anyhow::{bail, Context, Result};
use pixelshow_core::EffectKind;

/// Usage text
pub const USAGE: &str = "\
Usage: pixelshow [--devices N] [--effect KIND] [--music]

Runs a local show: N simulated devices join the configured event, the chosen
effect starts on all of them at once, and sensor samples read from stdin
(one integer per line) drive the audio-reactive overlay until EOF or Ctrl-C.

Options:
  --devices N     number of simulated devices (default from config)
  --effect KIND   solid, blink, wave or gradient (default wave)
  --music         enable audio-reactive mode
  -h, --help      show this help";

/// Parsed arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    /// Device count override
    pub devices: Option<usize>,
    /// Effect to start
    pub effect: EffectKind,
    /// Audio-reactive mode
    pub music: bool,
    /// Print usage and exit
    pub help: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            devices: None,
            effect: EffectKind::Wave,
            music: false,
            help: false,
        }
    }
}

impl Args {
    /// Parse arguments, program name excluded
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Args::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--devices" => {
                    let value = args.next().context("--devices needs a value")?;
                    parsed.devices = Some(
                        value
                            .parse()
                            .with_context(|| format!("invalid device count: {}", value))?,
                    );
                }
                "--effect" => {
                    let value = args.next().context("--effect needs a value")?;
                    parsed.effect = value.parse().map_err(anyhow::Error::msg)?;
                }
                "--music" => parsed.music = true,
                "-h" | "--help" => parsed.help = true,
                other => bail!("unknown argument: {}", other),
            }
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args> {
        Args::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_defaults() {
        assert_eq!(parse(&[]).unwrap(), Args::default());
    }

    #[test]
    fn test_all_flags() {
        let args = parse(&["--devices", "8", "--effect", "blink", "--music"]).unwrap();
        assert_eq!(args.devices, Some(8));
        assert_eq!(args.effect, EffectKind::Blink);
        assert!(args.music);
    }

    #[test]
    fn test_bad_input() {
        assert!(parse(&["--devices"]).is_err());
        assert!(parse(&["--devices", "many"]).is_err());
        assert!(parse(&["--effect", "strobe"]).is_err());
        assert!(parse(&["--loud"]).is_err());
    }
}
