// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!
A framework for notifying users about what tools are doing.

Library code never prints directly. It reports notes, warnings, and errors
through a `NotificationBackend`, and the command-line program decides how to
render them. Tests use `BufferingNotificationBackend` to inspect what was
reported.

*/

#[macro_use]
pub mod termcolor;

use anyhow::Error;
use clap::{Arg, ArgMatches, Command};
use std::fmt::Arguments;

/// How chatty the notification system should be.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum ChatterLevel {
    /// A minimal level of output — only warnings and errors will be reported.
    Minimal,

    /// The normal level of output — informational messages will be reported.
    Normal,
}

/// The kind of notification that is being produced.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NotificationKind {
    /// An informational notice.
    Note,

    /// Warning of an unusual condition; the program will likely perform as intended.
    Warning,

    /// Notification of a severe problem; the program will likely fail but will attempt to contine.
    Severe,

    /// Notification of a fatal error; the program must give up.
    Fatal,
}

/// Trait for type that handle notifications to the user.
pub trait NotificationBackend {
    /// Notify the user about an event.
    ///
    /// If `err` is not `None`, the information contained in the object should
    /// be reported after the main message.
    fn notify(&mut self, kind: NotificationKind, args: Arguments, err: Option<Error>);
}

/// Send an informational notification to the user.
///
/// Standard usage looks like this:
///
/// ```rust,ignore
/// rn_note!(nb, "converted {} visibilities", n_vis);
/// ```
///
/// where `nb` is a type implementing the NotificationBackend trait. You may
/// also provide an Error value after a semicolon; the information it contains
/// will be printed after the informational message. This is not expected to
/// be common usage for this particular macro, but makes more sense for the
/// `rn_warning!`, `rn_severe!`, and `rn_fatal!` macros.
#[macro_export]
macro_rules! rn_note {
    ($dest:expr, $( $fmt_args:expr ),*) => {
        $dest.notify($crate::notify::NotificationKind::Note, format_args!($( $fmt_args ),*), None)
    };
    ($dest:expr, $( $fmt_args:expr ),* ; $err:expr) => {
        $dest.notify($crate::notify::NotificationKind::Note, format_args!($( $fmt_args ),*), Some($err))
    };
}

/// Warn the user of a problematic condition.
///
/// See the documentation of `rn_note!` for usage information. This macro
/// should be used when an unusual condition has been detected, but the task
/// at hand will likely succeed.
#[macro_export]
macro_rules! rn_warning {
    ($dest:expr, $( $fmt_args:expr ),*) => {
        $dest.notify($crate::notify::NotificationKind::Warning, format_args!($( $fmt_args ),*), None)
    };
    ($dest:expr, $( $fmt_args:expr ),* ; $err:expr) => {
        $dest.notify($crate::notify::NotificationKind::Warning, format_args!($( $fmt_args ),*), Some($err))
    };
}

/// Notify the user of a severe problem.
///
/// See the documentation of `rn_note!` for usage information. This macro
/// should be used when an issue has been detected that makes it likely that
/// the task at hand cannot be completed successfully; however, the program
/// will attempt to continue.
#[macro_export]
macro_rules! rn_severe {
    ($dest:expr, $( $fmt_args:expr ),*) => {
        $dest.notify($crate::notify::NotificationKind::Severe, format_args!($( $fmt_args ),*), None)
    };
    ($dest:expr, $( $fmt_args:expr ),* ; $err:expr) => {
        $dest.notify($crate::notify::NotificationKind::Severe, format_args!($( $fmt_args ),*), Some($err))
    };
}

/// Notify the user of a fatal problem.
///
/// See the documentation of `rn_note!` for usage information. This macro
/// should be used when an issue has been detected that forces the program to
/// give up on the task at hand. If the command-line interface is being used,
/// it will probably exit almost immediately after a fatal notification is
/// issued.
#[macro_export]
macro_rules! rn_fatal {
    ($dest:expr, $( $fmt_args:expr ),*) => {
        $dest.notify($crate::notify::NotificationKind::Fatal, format_args!($( $fmt_args ),*), None)
    };
    ($dest:expr, $( $fmt_args:expr ),* ; $err:expr) => {
        $dest.notify($crate::notify::NotificationKind::Fatal, format_args!($( $fmt_args ),*), Some($err))
    };
}

#[derive(Debug)]
struct NotificationData {
    kind: NotificationKind,
    text: String,
}

/// A notification backend that keeps every notification in memory.
///
/// This is what tests hand to library code in order to check what it
/// reported. When a notification carries an error, the error's chain of
/// causes is appended to the text, separated by colons, in the same way
/// that the terminal backend prints it.
#[derive(Debug, Default)]
pub struct BufferingNotificationBackend {
    buf: Vec<NotificationData>,
}

impl BufferingNotificationBackend {
    /// Create a new, empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Iterate over the buffered notifications as (kind, text) pairs.
    pub fn messages(&self) -> impl Iterator<Item = (NotificationKind, &str)> {
        self.buf.iter().map(|d| (d.kind, d.text.as_str()))
    }

    /// Count the buffered notifications of a particular kind.
    pub fn count(&self, kind: NotificationKind) -> usize {
        self.buf.iter().filter(|d| d.kind == kind).count()
    }
}

impl NotificationBackend for BufferingNotificationBackend {
    fn notify(&mut self, kind: NotificationKind, args: Arguments, err: Option<Error>) {
        let text = match err {
            Some(e) => format!("{args}: {e:#}"),
            None => args.to_string(),
        };

        self.buf.push(NotificationData { kind, text });
    }
}

/// An extension trait for adding standard notification arguments to a clap
/// Command.
///
/// Programs that use `run_with_notifications` should call `notify_args` on
/// their `Command` so that the chatter level can be read back out of the
/// matches.
pub trait ClapNotificationArgsExt {
    /// Add the `--chatter`/`-c` argument, which takes the values "default"
    /// and "minimal".
    fn notify_args(self) -> Self;
}

impl ClapNotificationArgsExt for Command {
    fn notify_args(self) -> Self {
        self.arg(
            Arg::new("chatter_level")
                .long("chatter")
                .short('c')
                .value_name("LEVEL")
                .help("How much chatter to print when running")
                .value_parser(["default", "minimal"])
                .default_value("default"),
        )
    }
}

/// Run a function with colorized reporting of errors.
///
/// The chatter level is taken from the arguments added by
/// `ClapNotificationArgsExt::notify_args`, and a
/// `TermcolorNotificationBackend` is handed to *inner*. If *inner* succeeds,
/// its return value becomes the exit code. A failure is reported as a single
/// `error:` line listing the chain of causes, followed by a backtrace if one
/// was captured, and turns into an exit code of 1.
pub fn run_with_notifications<E, F>(matches: ArgMatches, inner: F) -> i32
where
    E: Into<Error>,
    F: FnOnce(ArgMatches, &mut dyn NotificationBackend) -> Result<i32, E>,
{
    let chatter = match matches.get_one::<String>("chatter_level").map(|s| s.as_str()) {
        Some("minimal") => ChatterLevel::Minimal,
        _ => ChatterLevel::Normal,
    };

    let mut tnb = termcolor::TermcolorNotificationBackend::new(chatter);

    match inner(matches, &mut tnb) {
        Ok(ret) => ret,

        Err(e) => {
            tnb.bare_error(e);
            1
        }
    }
}
