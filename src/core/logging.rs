use crate::core::Neighbor;
use std::fmt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use LoggerMsg::*;

/// Severity ordering for log lines. Each module carries a compile-time floor; the logger holds
/// the runtime level, which the node's `verbose` flag sets to `Trace` or `Info`.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum LogLevel {
  Trace,
  Debug,
  Info,
  Warn,
  Error,
  Off,
}
impl LogLevel {
  pub const MIN: LogLevel = LogLevel::Trace;
}
impl fmt::Display for LogLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      LogLevel::Trace => "TRACE",
      LogLevel::Debug => "DEBUG",
      LogLevel::Info => "INFO",
      LogLevel::Warn => "WARN",
      LogLevel::Error => "ERROR",
      LogLevel::Off => "OFF",
    };
    write!(f, "{}", s)
  }
}

pub enum LoggerMsg {
  Log(LogLevel, String),
  SetLevel(LogLevel),
}

/// Cheap cloneable handle to the logger task.
#[derive(Clone)]
pub struct LogRef {
  tx: UnboundedSender<LoggerMsg>,
}
impl LogRef {
  /// A handle with no logger behind it. Lines sent here vanish; useful where a component needs
  /// a [`LogRef`] but no task is running.
  pub fn sink() -> LogRef {
    let (tx, _) = unbounded_channel::<LoggerMsg>();
    LogRef { tx: tx }
  }

  pub fn log(&self, level: LogLevel, line: String) {
    let _ = self.tx.send(Log(level, line));
  }

  pub fn set_level(&self, level: LogLevel) {
    let _ = self.tx.send(SetLevel(level));
  }
}

/// One logger per node. Lines are human-readable and prefixed with the owning endpoint so
/// multi-node tests on one machine stay legible.
pub struct Logger {
  owner: Neighbor,
  level: LogLevel,
}
impl Logger {
  pub fn spawn(owner: Neighbor, level: LogLevel) -> LogRef {
    let (tx, mut rx) = unbounded_channel::<LoggerMsg>();
    let mut logger = Logger {
      owner: owner,
      level: level,
    };
    tokio::spawn(async move {
      while let Some(msg) = rx.recv().await {
        match msg {
          Log(level, line) => {
            if level >= logger.level {
              println!("[{}] {}: {}", level, logger.owner, line);
            }
          }
          SetLevel(level) => logger.level = level,
        }
      }
    });
    LogRef { tx: tx }
  }
}

#[macro_export]
macro_rules! trace {
  ($floor:expr, $log:expr, $msg:expr) => {
    if $crate::core::LogLevel::Trace >= $floor {
      $log.log($crate::core::LogLevel::Trace, $msg);
    }
  };
}

#[macro_export]
macro_rules! debug {
  ($floor:expr, $log:expr, $msg:expr) => {
    if $crate::core::LogLevel::Debug >= $floor {
      $log.log($crate::core::LogLevel::Debug, $msg);
    }
  };
}

#[macro_export]
macro_rules! info {
  ($floor:expr, $log:expr, $msg:expr) => {
    if $crate::core::LogLevel::Info >= $floor {
      $log.log($crate::core::LogLevel::Info, $msg);
    }
  };
}

#[macro_export]
macro_rules! warn {
  ($floor:expr, $log:expr, $msg:expr) => {
    if $crate::core::LogLevel::Warn >= $floor {
      $log.log($crate::core::LogLevel::Warn, $msg);
    }
  };
}

#[macro_export]
macro_rules! error {
  ($floor:expr, $log:expr, $msg:expr) => {
    if $crate::core::LogLevel::Error >= $floor {
      $log.log($crate::core::LogLevel::Error, $msg);
    }
  };
}
