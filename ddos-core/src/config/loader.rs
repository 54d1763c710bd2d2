use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::error::{DetectorError, Result};

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| DetectorError::Config(format!("failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt)
        .map_err(|e| DetectorError::Config(format!("failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.num_workers == 0 {
        return Err(DetectorError::NoWorkers);
    }
    if cfg.burst_size == 0 {
        return Err(DetectorError::Config("burst_size must be > 0".into()));
    }
    if !cfg.sketch.cols.is_power_of_two() {
        return Err(DetectorError::Config(format!(
            "sketch.cols must be a power of two, got {}",
            cfg.sketch.cols
        )));
    }
    if !(4..=8).contains(&cfg.sketch.rows) {
        return Err(DetectorError::Config(format!(
            "sketch.rows must be in [4, 8], got {}",
            cfg.sketch.rows
        )));
    }
    // Exercises the CIDR parsing eagerly so a bad network string fails at
    // startup rather than on the first packet.
    cfg.classification()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_cols() {
        let mut cfg = Config::default();
        cfg.sketch.cols = 4000;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn load_from_path_round_trips_a_minimal_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "num_workers = 2\nburst_size = 512\n").unwrap();
        let cfg = load_from_path(file.path()).unwrap();
        assert_eq!(cfg.num_workers, 2);
        assert_eq!(cfg.burst_size, 512);
    }
}
