/*!

# Overview

The `log` module provides logging with a numeric verbosity threshold layered on top of the usual
log levels. The level describes what _kind_ of message is being logged; the threshold describes
how _verbose_ the logger must be before the message is emitted.

The runtime logs through this module only: module loads at `info!`, dispatch decisions and handle
cleanup at `debug!`, pipeline propagation at `trace!`, load-time anomalies at `warning!`.

## Threshold

The global logging threshold is a numerical value, with higher values meaning more verbose
logging. This global value is the same for all levels. Individual log entries are logged "at" a
given threshold and are only emitted if that threshold is _at most_ the global threshold. A
message with threshold 0 is always emitted.

```
use comp_core::log::{set_global_logging_threshold, get_global_logging_threshold};

// Only messages logged at threshold <= 1 are emitted from here on.
set_global_logging_threshold(1);
assert_eq!(get_global_logging_threshold(), 1);
```

## Macros

The following macros are provided for logging at different levels: `critical!`, `error!`,
`warning!`, `info!`, `debug!`, `trace!`.

Syntax:

```ignore
// With threshold
level!(threshold, "format string", args...);

// Without threshold (indicates threshold of 0, always emitted)
level!("format string", args...);
```

 - `threshold`: a `u8` value representing the threshold for the log message.
 - `"format string"`: a format string, similar to `println!`.
 - `args...`: arguments to be formatted into the format string.

The macros handle logger initialization automatically; no explicit initialization is required.
The global logging threshold is managed using atomic operations, ensuring thread safety.

*/
mod formatter;
mod threshold_filter;
mod macros;

use std::sync::{
    atomic::{AtomicU8, Ordering},
    LazyLock
  };

use tracing_subscriber::{
  fmt,
  layer::SubscriberExt,
  Registry
};

use threshold_filter::ThresholdFilterLayer;
use formatter::EventFieldFormatter;
pub use macros::*;

/// Used for implicit initialization.
static INIT_LOGGER: LazyLock<()> = LazyLock::new(|| {
  let subscriber = Registry::default()
      .with(ThresholdFilterLayer)
      .with(
        fmt::layer()
            .fmt_fields(EventFieldFormatter)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stdout),
      );

  tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
});

/// This does not need to be called directly. Initializes the logging system.
pub fn init_logger() {
  LazyLock::force(&INIT_LOGGER);
}

static GLOBAL_LOGGING_THRESHOLD: AtomicU8 = AtomicU8::new(3); // Default threshold

/// Sets the global threshold. Messages logged at a greater threshold are not emitted.
pub fn set_global_logging_threshold(new_threshold: u8) {
  GLOBAL_LOGGING_THRESHOLD.store(new_threshold, Ordering::SeqCst);
}

/// Retrieves the global threshold.
pub fn get_global_logging_threshold() -> u8 {
  GLOBAL_LOGGING_THRESHOLD.load(Ordering::SeqCst)
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn threshold_round_trip() {
    set_global_logging_threshold(3);
    assert_eq!(get_global_logging_threshold(), 3);

    // Emitted: threshold (2) <= global threshold (3).
    info!(2, "loading module {}", "net");
    // Not emitted: threshold (4) > global threshold (3).
    debug!(4, "NOT logged: candidate score {:?}", (1u32, 0u32));
    // Emitted with default threshold of 0.
    warning!("an unexpected condition occurred");

    set_global_logging_threshold(5);
    // Emitted now that the global threshold is 5.
    trace!(4, "pipeline op {} skipped", 2);
  }
}
