//! Console output plus a daily `logs-YYYY-MM-DD.csv` audit file with
//! `timestamp,level,target,message` rows.

use std::fmt::{self, Write as _};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info";

pub fn init(log_dir: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(CsvLogLayer::new(log_dir))
        .init();
}

pub struct CsvLogLayer {
    dir: PathBuf,
    write: Mutex<()>,
}

impl CsvLogLayer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write: Mutex::new(()),
        }
    }

    pub fn file_for(&self, now: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("logs-{}.csv", now.format("%Y-%m-%d")))
    }

    fn append(&self, now: DateTime<Utc>, level: &str, target: &str, message: &str) -> csv::Result<()> {
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.file_for(now))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record([now.to_rfc3339().as_str(), level, target, message])?;
        writer.flush()?;
        Ok(())
    }
}

/// Flattens an event into its message followed by `key=value` pairs.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn into_line(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for CsvLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();

        if let Err(error) = self.append(
            Utc::now(),
            metadata.level().as_str(),
            metadata.target(),
            &visitor.into_line(),
        ) {
            eprintln!("Could not write log file: {error}");
        }
    }
}
