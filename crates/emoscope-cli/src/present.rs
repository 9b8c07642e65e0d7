//! Live overlay output and the stop key.

use emoscope_core::{BoundingBox, EmotionLabel};
use emoscope_hw::Frame;
use std::io::Write;
use thiserror::Error;

/// Key that requests shutdown.
pub const STOP_KEY: u8 = b'q';
/// Keypress poll timeout per frame.
const KEY_POLL_MS: i32 = 1;

#[derive(Error, Debug)]
pub enum PresentError {
    #[error("display error: {0}")]
    Display(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// What to draw for one accepted detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    /// `None` in full-frame mode: no box is drawn.
    pub bbox: Option<BoundingBox>,
    pub label: EmotionLabel,
    /// Text origin in frame pixels.
    pub anchor: (i32, i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// Shows each processed frame and reports whether the user asked to stop.
pub trait Presenter {
    fn present(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<Control, PresentError>;
}

impl<P: Presenter + ?Sized> Presenter for Box<P> {
    fn present(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<Control, PresentError> {
        (**self).present(frame, overlays)
    }
}

/// Prints label changes to stdout and reads the stop key from stdin.
///
/// When stdin is a terminal it is put into non-canonical, no-echo mode for
/// the presenter's lifetime, so `q` acts without Enter.
pub struct TerminalPresenter<W: Write = std::io::Stdout> {
    out: W,
    last: Vec<EmotionLabel>,
    stdin_open: bool,
    _raw: Option<RawMode>,
}

impl TerminalPresenter {
    pub fn stdout() -> Self {
        let mut presenter = Self::new(std::io::stdout());
        presenter._raw = RawMode::enable(libc::STDIN_FILENO);
        presenter
    }
}

impl<W: Write> TerminalPresenter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last: Vec::new(),
            stdin_open: true,
            _raw: None,
        }
    }

    /// Print only when the set of labels on screen changes.
    fn render(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<(), PresentError> {
        let labels: Vec<EmotionLabel> = overlays.iter().map(|o| o.label).collect();
        if labels == self.last {
            return Ok(());
        }
        if overlays.is_empty() {
            writeln!(self.out, "[frame {}] no face", frame.sequence)?;
        } else {
            let parts: Vec<String> = overlays
                .iter()
                .map(|o| match o.bbox {
                    Some(b) => format!(
                        "{} @ ({:.0},{:.0} {:.0}x{:.0})",
                        o.label, b.x, b.y, b.width, b.height
                    ),
                    None => o.label.to_string(),
                })
                .collect();
            writeln!(self.out, "[frame {}] {}", frame.sequence, parts.join(", "))?;
        }
        self.out.flush()?;
        self.last = labels;
        Ok(())
    }

    fn poll_stop_key(&mut self) -> Result<Control, PresentError> {
        if !self.stdin_open {
            return Ok(Control::Continue);
        }
        match poll_byte(libc::STDIN_FILENO, KEY_POLL_MS)? {
            StdinPoll::Byte(b) if b == STOP_KEY => Ok(Control::Stop),
            StdinPoll::Byte(_) | StdinPoll::Idle => Ok(Control::Continue),
            StdinPoll::Closed => {
                tracing::debug!("stdin closed; stop key disabled");
                self.stdin_open = false;
                Ok(Control::Continue)
            }
        }
    }
}

impl<W: Write> Presenter for TerminalPresenter<W> {
    fn present(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<Control, PresentError> {
        self.render(frame, overlays)?;
        self.poll_stop_key()
    }
}

/// Terminal settings saved before disabling line buffering and echo.
/// Restored on drop.
struct RawMode {
    fd: libc::c_int,
    saved: libc::termios,
}

impl RawMode {
    /// `None` when `fd` is not a terminal or its settings cannot be changed.
    fn enable(fd: libc::c_int) -> Option<Self> {
        // SAFETY: isatty only inspects the descriptor.
        if unsafe { libc::isatty(fd) } != 1 {
            return None;
        }

        // SAFETY: termios is plain data; tcgetattr fills it in.
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut saved) } != 0 {
            tracing::warn!(error = %std::io::Error::last_os_error(), "cannot read terminal settings");
            return None;
        }

        let mut raw = saved;
        raw.c_lflag &= !(libc::ICANON | libc::ECHO);
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;
        // SAFETY: `raw` is a valid termios derived from the current settings.
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
            tracing::warn!(error = %std::io::Error::last_os_error(), "cannot change terminal settings");
            return None;
        }

        tracing::debug!(fd, "terminal in single-key mode");
        Some(Self { fd, saved })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        // SAFETY: restoring settings previously read from the same descriptor.
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &self.saved) } != 0 {
            tracing::warn!(error = %std::io::Error::last_os_error(), "failed to restore terminal settings");
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StdinPoll {
    Byte(u8),
    Idle,
    Closed,
}

/// Wait up to `timeout_ms` for one byte on `fd`.
fn poll_byte(fd: libc::c_int, timeout_ms: i32) -> std::io::Result<StdinPoll> {
    let mut fds = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    // SAFETY: `fds` is a valid pollfd for the duration of the call; nfds = 1.
    let ret = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            return Ok(StdinPoll::Idle);
        }
        return Err(err);
    }
    if ret == 0 {
        return Ok(StdinPoll::Idle);
    }
    if fds.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0
        && fds.revents & libc::POLLIN == 0
    {
        return Ok(StdinPoll::Closed);
    }

    let mut byte = 0u8;
    // SAFETY: reading at most one byte into a valid one-byte buffer.
    let n = unsafe { libc::read(fd, (&mut byte as *mut u8).cast(), 1) };
    match n {
        1 => Ok(StdinPoll::Byte(byte)),
        0 => Ok(StdinPoll::Closed),
        _ => Err(std::io::Error::last_os_error()),
    }
}

#[cfg(feature = "display")]
pub use window::WindowPresenter;

#[cfg(feature = "display")]
mod window {
    use super::{Control, Overlay, PresentError, Presenter, STOP_KEY};
    use emoscope_hw::Frame;
    use opencv::core::{self, Mat, Point, Rect, Scalar};
    use opencv::prelude::*;
    use opencv::{highgui, imgproc};

    const WINDOW_NAME: &str = "Real-time Emotion Detection";

    fn cv(e: opencv::Error) -> PresentError {
        PresentError::Display(e.to_string())
    }

    /// OpenCV highgui window with red boxes and labels.
    pub struct WindowPresenter;

    impl WindowPresenter {
        pub fn open() -> Result<Self, PresentError> {
            highgui::named_window(WINDOW_NAME, highgui::WINDOW_AUTOSIZE).map_err(cv)?;
            Ok(Self)
        }
    }

    impl Presenter for WindowPresenter {
        fn present(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<Control, PresentError> {
            let gray = Mat::new_rows_cols_with_data(frame.height as i32, frame.width as i32, &frame.data)
                .map_err(cv)?;
            let mut canvas = Mat::default();
            imgproc::cvt_color(
                &*gray,
                &mut canvas,
                imgproc::COLOR_GRAY2BGR,
                0,
                core::AlgorithmHint::ALGO_HINT_DEFAULT,
            )
            .map_err(cv)?;

            let red = Scalar::new(0.0, 0.0, 255.0, 0.0);
            for overlay in overlays {
                if let Some(b) = overlay.bbox {
                    let rect = Rect::new(b.x as i32, b.y as i32, b.width as i32, b.height as i32);
                    imgproc::rectangle(&mut canvas, rect, red, 2, imgproc::LINE_8, 0).map_err(cv)?;
                }
                imgproc::put_text(
                    &mut canvas,
                    overlay.label.as_str(),
                    Point::new(overlay.anchor.0, overlay.anchor.1),
                    imgproc::FONT_HERSHEY_SIMPLEX,
                    0.9,
                    red,
                    2,
                    imgproc::LINE_AA,
                    false,
                )
                .map_err(cv)?;
            }

            highgui::imshow(WINDOW_NAME, &canvas).map_err(cv)?;
            let key = highgui::wait_key(super::KEY_POLL_MS).map_err(cv)?;
            if key >= 0 && (key & 0xFF) as u8 == STOP_KEY {
                Ok(Control::Stop)
            } else {
                Ok(Control::Continue)
            }
        }
    }

    impl Drop for WindowPresenter {
        fn drop(&mut self) {
            let _ = highgui::destroy_all_windows();
        }
    }
}
