// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
A notification backend that sends colorized output to the terminal.
*/

use anyhow::Error;
use std::backtrace::BacktraceStatus;
use std::fmt::Arguments;
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use super::{ChatterLevel, NotificationBackend, NotificationKind};

/// A notification backend that writes colorized output to the terminal.
///
/// Notes go to standard output, everything else to standard error, each
/// with a colorized prefix.
pub struct TermcolorNotificationBackend {
    chatter: ChatterLevel,
    stdout: StandardStream,
    stderr: StandardStream,
    note_spec: ColorSpec,
    warning_spec: ColorSpec,
    severe_spec: ColorSpec,
    fatal_spec: ColorSpec,
}

impl TermcolorNotificationBackend {
    /// Create a backend that writes to the standard streams. Notes are
    /// suppressed at the `Minimal` chatter level.
    pub fn new(chatter: ChatterLevel) -> TermcolorNotificationBackend {
        let mut note_spec = ColorSpec::new();
        note_spec.set_fg(Some(Color::Green)).set_bold(true);

        let mut warning_spec = ColorSpec::new();
        warning_spec.set_fg(Some(Color::Yellow)).set_bold(true);

        let mut severe_spec = ColorSpec::new();
        severe_spec.set_fg(Some(Color::Red)).set_bold(true);

        let mut fatal_spec = ColorSpec::new();
        fatal_spec.set_fg(Some(Color::Red)).set_bold(true);

        TermcolorNotificationBackend {
            chatter,
            stdout: StandardStream::stdout(ColorChoice::Auto),
            stderr: StandardStream::stderr(ColorChoice::Auto),
            note_spec,
            warning_spec,
            severe_spec,
            fatal_spec,
        }
    }

    fn suppressed(&self, kind: NotificationKind) -> bool {
        kind == NotificationKind::Note && self.chatter <= ChatterLevel::Minimal
    }

    // Terminal write failures are ignored: there is nowhere left to report them.
    fn generic_message(&mut self, kind: NotificationKind, prefix: Option<&str>, args: Arguments) {
        if self.suppressed(kind) {
            return;
        }

        let text = prefix.unwrap_or(match kind {
            NotificationKind::Note => "note:",
            NotificationKind::Warning => "warning:",
            NotificationKind::Severe => "severe:",
            NotificationKind::Fatal => "fatal:",
        });

        let (spec, stream) = match kind {
            NotificationKind::Note => (&self.note_spec, &mut self.stdout),
            NotificationKind::Warning => (&self.warning_spec, &mut self.stderr),
            NotificationKind::Severe => (&self.severe_spec, &mut self.stderr),
            NotificationKind::Fatal => (&self.fatal_spec, &mut self.stderr),
        };

        let _ = stream.set_color(spec);
        let _ = write!(stream, "{text}");
        let _ = stream.reset();
        let _ = writeln!(stream, " {args}");
    }

    fn maybe_backtrace(&mut self, kind: NotificationKind, err: &Error) {
        let backtrace = err.backtrace();

        if backtrace.status() != BacktraceStatus::Captured {
            return;
        }

        self.generic_message(kind, Some("debugging:"), format_args!("backtrace follows:"));

        if !self.suppressed(kind) {
            let _ = writeln!(self.stderr, "{backtrace}");
        }
    }

    /// Print the information contained in an Error object.
    ///
    /// The error and its causes are joined onto a single line. A backtrace
    /// is only printed if one was captured.
    pub fn bare_error<E: Into<Error>>(&mut self, err: E) {
        let err = err.into();
        self.generic_message(
            NotificationKind::Severe,
            Some("error:"),
            format_args!("{err:#}"),
        );
        self.maybe_backtrace(NotificationKind::Severe, &err);
    }
}

impl NotificationBackend for TermcolorNotificationBackend {
    fn notify(&mut self, kind: NotificationKind, args: Arguments, err: Option<Error>) {
        self.generic_message(kind, None, args);

        if let Some(e) = err {
            for fail in e.chain() {
                self.generic_message(kind, Some("caused by:"), format_args!("{fail}"));
            }

            self.maybe_backtrace(kind, &e);
        }
    }
}
