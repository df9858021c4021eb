//! Stderr progress shared by the binaries: a spinner per setup step and a bar
//! across a batch, or plain lines when stderr is not a terminal.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

const SPINNER_TEMPLATE: &str = "{spinner} {msg}";
const BATCH_TEMPLATE: &str = "{bar:30} {pos}/{len} {elapsed} {wide_msg}";

#[derive(Clone, Copy, Debug)]
pub struct Ui {
    animated: bool,
}

impl Ui {
    /// `mode` is `auto`, `plain` or `pretty`. Animation needs stderr on a
    /// terminal; `auto` also turns it off when stdout is redirected.
    pub fn for_terminal(mode: &str) -> Self {
        let stderr_tty = std::io::stderr().is_terminal();
        let stdout_tty = std::io::stdout().is_terminal();
        let animated = stderr_tty
            && match mode {
                "plain" => false,
                "pretty" => true,
                _ => stdout_tty,
            };
        Self { animated }
    }

    /// Progress for one setup step; reports its duration when dropped.
    pub fn stage(&self, label: &str) -> Progress {
        let bar = self.animated.then(|| {
            let bar = styled(ProgressBar::new_spinner(), SPINNER_TEMPLATE);
            bar.enable_steady_tick(Duration::from_millis(120));
            bar.set_message(format!("{label}…"));
            bar
        });
        if bar.is_none() {
            eprintln!("==> {label}");
        }
        Progress::new(label, bar, None)
    }

    /// Progress across a batch of `total` images.
    #[allow(dead_code)]
    pub fn batch(&self, total: usize) -> Progress {
        let bar = self
            .animated
            .then(|| styled(ProgressBar::new(total as u64), BATCH_TEMPLATE));
        Progress::new("batch", bar, Some(total))
    }
}

fn styled(bar: ProgressBar, template: &str) -> ProgressBar {
    bar.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::with_template(template) {
        bar.set_style(style);
    }
    bar
}

pub struct Progress {
    label: String,
    bar: Option<ProgressBar>,
    /// Image count for a batch; `None` for a setup step.
    total: Option<usize>,
    started: Instant,
}

impl Progress {
    fn new(label: &str, bar: Option<ProgressBar>, total: Option<usize>) -> Self {
        Self {
            label: label.to_string(),
            bar,
            total,
            started: Instant::now(),
        }
    }

    fn report(&self, line: String) {
        match &self.bar {
            Some(bar) => bar.finish_with_message(line),
            None => eprintln!("{line}"),
        }
    }

    /// Announce image `index` (zero-based).
    #[allow(dead_code)]
    pub fn image(&self, index: usize, name: &str) {
        match (&self.bar, self.total) {
            (Some(bar), _) => {
                bar.set_position(index as u64);
                bar.set_message(name.to_string());
            }
            (None, Some(total)) => eprintln!("[{}/{}] {}", index + 1, total, name),
            (None, None) => eprintln!("    {name}"),
        }
    }

    #[allow(dead_code)]
    pub fn finish(&self, processed: usize, skipped: usize) {
        if let (Some(bar), Some(total)) = (&self.bar, self.total) {
            bar.set_position(total as u64);
        }
        self.report(format!(
            "✔ {processed} images ranked, {skipped} skipped in {}",
            format_elapsed(self.started.elapsed())
        ));
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        // Batches report through `finish`.
        if self.total.is_none() {
            self.report(format!("✔ {} in {}", self.label, format_elapsed(self.started.elapsed())));
        }
    }
}

fn format_elapsed(taken: Duration) -> String {
    match taken.as_millis() {
        ms if ms < 1000 => format!("{ms}ms"),
        _ => format!("{:.2}s", taken.as_secs_f64()),
    }
}
