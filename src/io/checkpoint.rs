//! State checkpoints and the energy log.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::observer::EnergyStatistic;

/// Persists the full variational state.
pub trait StateWriter<S> {
    fn write(&self, state: &S, path: &Path) -> Result<()>;
}

/// Writes any serializable state as YAML.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlStateWriter;

impl<S: Serialize> StateWriter<S> for YamlStateWriter {
    fn write(&self, state: &S, path: &Path) -> Result<()> {
        write_yaml(BufWriter::new(File::create(path)?), state)
    }
}

/// Serialize `state` into `writer` and flush it, so a failed write surfaces here.
fn write_yaml<W: Write, S: Serialize + ?Sized>(mut writer: W, state: &S) -> Result<()> {
    serde_yaml::to_writer(&mut writer, state)?;
    writer.flush()?;
    Ok(())
}

/// Load a state written by [`YamlStateWriter`].
pub fn read_state<S: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<S> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_yaml::from_reader(reader)?)
}

/// Checkpoint path of gradient step `step`, or `None` for an empty template.
pub fn checkpoint_path(template: &str, step: usize) -> Option<PathBuf> {
    if template.is_empty() {
        return None;
    }
    Some(PathBuf::from(template.replace("{step}", &step.to_string())))
}

/// Append `mean error` of one gradient step.
pub fn append_energy_log(path: &Path, energy: &EnergyStatistic) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{} {}", energy.mean, energy.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavefunction::{models, Lattice, ProductState};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_checkpoint_path_template() {
        assert_eq!(checkpoint_path("run/state_{step}.yaml", 7), Some(PathBuf::from("run/state_7.yaml")));
        assert_eq!(checkpoint_path("last.yaml", 7), Some(PathBuf::from("last.yaml")));
        assert_eq!(checkpoint_path("", 7), None);
    }

    #[test]
    fn test_state_round_trip_through_yaml() {
        let mut rng = StdRng::seed_from_u64(71);
        let lattice = Lattice::new(1, 2);
        let state = ProductState::random(lattice, 2, models::heisenberg(lattice, 1.0), true, 0.2, &mut rng).unwrap();
        let path = std::env::temp_dir().join(format!("tn_vmc_state_{}.yaml", std::process::id()));
        YamlStateWriter.write(&state, &path).unwrap();
        let restored: ProductState = read_state(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(restored, state);
    }

    /// Accepts every byte but fails to flush, like a full disk behind a buffer.
    struct FailingFlush;

    impl Write for FailingFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left"))
        }
    }

    #[test]
    fn test_failed_flush_is_reported() {
        let mut rng = StdRng::seed_from_u64(72);
        let lattice = Lattice::new(1, 2);
        let state = ProductState::random(lattice, 2, models::heisenberg(lattice, 1.0), false, 0.2, &mut rng).unwrap();
        assert!(write_yaml(BufWriter::new(FailingFlush), &state).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_to_full_device_fails() {
        let mut rng = StdRng::seed_from_u64(73);
        let lattice = Lattice::new(2, 2);
        let state = ProductState::random(lattice, 2, models::heisenberg(lattice, 1.0), false, 0.2, &mut rng).unwrap();
        assert!(YamlStateWriter.write(&state, Path::new("/dev/full")).is_err());
    }

    #[test]
    fn test_energy_log_appends_lines() {
        let path = std::env::temp_dir().join(format!("tn_vmc_energy_{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let energy = EnergyStatistic { mean: -0.5, error: 0.01, total_weight: 1.0, sample_count: 10 };
        append_energy_log(&path, &energy).unwrap();
        append_energy_log(&path, &energy).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(text.lines().next().unwrap(), "-0.5 0.01");
    }
}
