//! Camera RAW to decodable raster conversion.
//!
//! Methods are tried in order until one produces a non-empty file:
//! 1. native decode (feature `raw-imagepipe`): camera white balance, full
//!    resolution, encoded to a temporary PNG
//! 2. `dcraw -c -w <file>` with stdout captured to a temporary PPM, killed
//!    after the configured timeout
//! 3. direct decode as an ordinary raster (diagnostic tooling only)
//!
//! Every method writes a freshly created temporary file. A method that fails
//! after creating its file drops it, which deletes it. The successful file is
//! returned as a [`TempPath`] that the caller owns.

use std::ffi::OsString;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};
use tempfile::{NamedTempFile, TempPath};

const TEMP_PREFIX: &str = "goggles-raw-";
const POLL_INTERVAL: Duration = Duration::from_millis(20);
const STDERR_TAIL_BYTES: usize = 4096;

#[derive(Clone, Debug, PartialEq)]
pub struct RawSettings {
    /// External decoder executable.
    pub dcraw_path: PathBuf,
    /// Kill the external decoder after this long.
    pub timeout: Duration,
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            dcraw_path: PathBuf::from("dcraw"),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversionStage {
    Native,
    External,
    Direct,
}

impl fmt::Display for ConversionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConversionStage::Native => "native decoder",
            ConversionStage::External => "external decoder",
            ConversionStage::Direct => "direct decode",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StageFailure {
    pub stage: ConversionStage,
    pub message: String,
}

/// Every conversion method failed. Carries each method's error.
#[derive(Debug, thiserror::Error)]
#[error("all RAW conversion methods failed for {}: {}", .path.display(), describe_failures(.failures))]
pub struct ConversionError {
    pub path: PathBuf,
    pub failures: Vec<StageFailure>,
}

fn describe_failures(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.stage, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Arguments passed to the external decoder: write to stdout, use camera white balance.
pub fn dcraw_args(path: &Path) -> Vec<OsString> {
    vec!["-c".into(), "-w".into(), path.as_os_str().to_os_string()]
}

pub struct RawConverter {
    settings: RawSettings,
    direct_fallback: bool,
}

impl RawConverter {
    pub fn new(settings: RawSettings) -> Self {
        Self {
            settings,
            direct_fallback: false,
        }
    }

    /// Enable the last-resort direct decode (diagnostic tooling).
    pub fn with_direct_fallback(mut self, enabled: bool) -> Self {
        self.direct_fallback = enabled;
        self
    }

    pub fn settings(&self) -> &RawSettings {
        &self.settings
    }

    /// Convert `path` to a decodable temporary file.
    pub fn convert_to_decodable(&self, path: &Path) -> Result<TempPath, ConversionError> {
        let mut failures = Vec::new();

        let mut stages = vec![ConversionStage::Native, ConversionStage::External];
        if self.direct_fallback {
            stages.push(ConversionStage::Direct);
        }

        for stage in stages {
            let attempt = match stage {
                ConversionStage::Native => self.native_decode(path),
                ConversionStage::External => self.external_decode(path),
                ConversionStage::Direct => self.direct_decode(path),
            };
            match attempt.and_then(|temp| ensure_usable(temp, stage)) {
                Ok(temp) => {
                    log::debug!("converted {} with {} to {}", path.display(), stage, temp.display());
                    return Ok(temp);
                }
                Err(e) => {
                    log::debug!("{} could not convert {}: {:#}", stage, path.display(), e);
                    failures.push(StageFailure {
                        stage,
                        message: format!("{e:#}"),
                    });
                }
            }
        }

        Err(ConversionError {
            path: path.to_path_buf(),
            failures,
        })
    }

    #[cfg(feature = "raw-imagepipe")]
    fn native_decode(&self, path: &Path) -> Result<TempPath> {
        let decoded = imagepipe::simple_decode_8bit(path, 0, 0)
            .map_err(|e| anyhow!("imagepipe: {}", e))?;
        let rgb = RgbImage::from_raw(decoded.width as u32, decoded.height as u32, decoded.data)
            .ok_or_else(|| anyhow!("decoded RAW buffer does not match its dimensions"))?;
        write_temp_png(&rgb)
    }

    #[cfg(not(feature = "raw-imagepipe"))]
    fn native_decode(&self, _path: &Path) -> Result<TempPath> {
        Err(anyhow!(
            "native RAW decoding not available (built without the raw-imagepipe feature)"
        ))
    }

    fn external_decode(&self, path: &Path) -> Result<TempPath> {
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".ppm")
            .tempfile()
            .context("create temporary file for external decoder output")?;
        let stdout = temp.reopen().context("open temporary file for writing")?;
        // stderr goes to a file so a chatty decoder never blocks on a full pipe.
        let mut stderr_file = tempfile::tempfile().context("create temporary file for decoder stderr")?;
        let stderr = stderr_file
            .try_clone()
            .context("share decoder stderr file")?;

        let program = &self.settings.dcraw_path;
        let mut child = Command::new(program)
            .args(dcraw_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .with_context(|| format!("failed to start {}", program.display()))?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().context("wait for external decoder")? {
                break status;
            }
            if started.elapsed() >= self.settings.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!(
                    "{} timed out after {:.1}s",
                    program.display(),
                    self.settings.timeout.as_secs_f64()
                ));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            let stderr = read_stderr_tail(&mut stderr_file);
            return Err(anyhow!(
                "{} exited with {}: {}",
                program.display(),
                status,
                stderr.trim()
            ));
        }

        Ok(temp.into_temp_path())
    }

    fn direct_decode(&self, path: &Path) -> Result<TempPath> {
        let rgb = super::decode_rgb(path)?;
        write_temp_png(&rgb)
    }
}

/// Last `STDERR_TAIL_BYTES` of the decoder's stderr, lossily decoded.
fn read_stderr_tail(file: &mut File) -> String {
    let mut bytes = Vec::new();
    if file.seek(SeekFrom::Start(0)).is_err() || file.read_to_end(&mut bytes).is_err() {
        return String::new();
    }
    let start = bytes.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

fn write_temp_png(rgb: &RgbImage) -> Result<TempPath> {
    let temp: NamedTempFile = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".png")
        .tempfile()
        .context("create temporary file for converted image")?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        rgb.write_to(&mut writer, ImageFormat::Png)
            .context("encode converted image")?;
    }
    Ok(temp.into_temp_path())
}

/// A stage's output counts only if it exists and is non-empty.
fn ensure_usable(temp: TempPath, stage: ConversionStage) -> Result<TempPath> {
    let len = std::fs::metadata(&temp)
        .map(|m| m.len())
        .with_context(|| format!("{} output is missing", stage))?;
    if len == 0 {
        return Err(anyhow!("{} produced an empty file", stage));
    }
    Ok(temp)
}
