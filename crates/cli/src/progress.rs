//! Cargo-style progress output for msync
//!
//! Displays progress in the familiar cargo format:
//! ```text
//!    Checking 952 files against V2024.1 of ocssw...
//! Downloading [===========>             ] 500/952 bin/l2gen
//!  Downloaded 952 files (67.44 MiB) in 3.2s
//! ```

use std::io::Write as _;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Draw target shared by every bar and by console logging
static MULTI: LazyLock<MultiProgress> = LazyLock::new(MultiProgress::new);

/// Status verbs for cargo-style output (right-aligned to 12 chars)
struct Status;

impl Status {
    const CHECKING: &str = "Checking";
    const DOWNLOADING: &str = "Downloading";
    const DOWNLOADED: &str = "Downloaded";
    const FRESH: &str = "Fresh";
}

/// Print a cargo-style status line
fn print_status(status: &str, message: &str) {
    let style = console::Style::new().green().bold();
    MULTI.suspend(|| {
        let mut term = console::Term::stderr();
        let _ = writeln!(term, "{:>12} {}", style.apply_to(status), message);
    });
}

/// Log writer that clears progress bars while a line is written
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressWriter;

impl std::io::Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        MULTI.suspend(|| std::io::stderr().write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for ProgressWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

/// Progress tracker for one download run
pub struct DownloadProgress {
    start: Instant,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Show the initial "Checking N files" message
    pub fn checking(&self, files: usize, tag: &str, name: &str) {
        print_status(
            Status::CHECKING,
            &format!("{files} files against {tag} of {name}..."),
        );
    }

    /// Create a progress bar for file transfers
    pub fn file_bar(&self, total_files: u64) -> ProgressBar {
        let pb = MULTI.add(ProgressBar::new(total_files));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:>12} [{bar:25.cyan/dim}] {pos}/{len} {prefix:.dim}")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.set_message(Status::DOWNLOADING);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Show final summary
    pub fn finish(&self, written: usize, bytes: u64, failed: usize) {
        let elapsed = self.start.elapsed();
        let elapsed_str = if elapsed.as_secs() >= 1 {
            format!("{:.2}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        };
        let size_str = humansize::format_size(bytes, humansize::BINARY);

        if failed == 0 && written == 0 {
            print_status(Status::FRESH, "all files match the manifest");
        } else if failed == 0 {
            print_status(
                Status::DOWNLOADED,
                &format!("{written} files ({size_str}) in {elapsed_str}"),
            );
        } else {
            let style = console::Style::new().yellow().bold();
            MULTI.suspend(|| {
                let mut term = console::Term::stderr();
                let _ = writeln!(
                    term,
                    "{:>12} {written} successful, {failed} failed in {elapsed_str}",
                    style.apply_to("Finished"),
                );
            });
        }
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}
