//! Operator console: line parsing and the replies sent back.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;

use crate::capture::CaptureRequest;
use crate::error::{Error, Result};
use crate::studio::Studio;

pub const HELP: &str = "\
Commands:
  capture <class>[,<class>...] <samples>   capture samples for each class in turn
  abort                                    cancel the running capture
  export data                              write the dataset CSV
  export model <dest>                      copy the trained model to <dest>
  load data                                replace the dataset with the saved CSV
  clear                                    drop every captured sample
  train                                    train on the saved CSV
  predict on|off                           start or stop live prediction
  status                                   show mode, dataset and model state
  help                                     this text
  quit                                     stop the camera and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Capture(CaptureRequest),
    Abort,
    ExportData,
    ExportModel(PathBuf),
    LoadData,
    Clear,
    Train,
    Predict(bool),
    Status,
    Help,
    Quit,
}

impl Command {
    /// Capture batches block until every class is done.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Command::Capture(_))
    }
}

/// Reply to one control request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlReply {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl ControlReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            accuracy: None,
        }
    }

    pub fn failed(err: &Error) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            accuracy: None,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }
}

/// Parse one console line. Blank lines are `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match (verb.to_ascii_lowercase().as_str(), rest.as_slice()) {
        ("capture", [names @ .., count]) if !names.is_empty() => {
            let samples: i64 = count
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("'{}' is not a sample count", count)))?;
            let classes = names.join(" ");
            Command::Capture(CaptureRequest::new(classes.split(','), samples)?)
        }
        ("capture", _) => return Err(usage("capture <class>[,<class>...] <samples>")),
        ("abort", []) => Command::Abort,
        ("export", ["data"]) => Command::ExportData,
        ("export", ["model", dest]) => Command::ExportModel(PathBuf::from(*dest)),
        ("export", _) => return Err(usage("export data | export model <dest>")),
        ("load", ["data"]) => Command::LoadData,
        ("clear", []) => Command::Clear,
        ("train", []) => Command::Train,
        ("predict", ["on"]) | ("start", []) => Command::Predict(true),
        ("predict", ["off"]) | ("stop", []) => Command::Predict(false),
        ("predict", _) => return Err(usage("predict on|off")),
        ("status", []) => Command::Status,
        ("help", _) | ("?", _) => Command::Help,
        ("quit", []) | ("exit", []) => Command::Quit,
        _ => {
            return Err(Error::InvalidArgument(format!(
                "unknown command '{}'; type 'help'",
                line.trim()
            )))
        }
    };
    Ok(Some(command))
}

fn usage(text: &str) -> Error {
    Error::InvalidArgument(format!("usage: {}", text))
}

/// Run `command` against the studio. Failures become unsuccessful replies.
pub fn execute(studio: &Studio, command: &Command) -> ControlReply {
    let result = match command {
        Command::Capture(request) => studio.capture_classes(request).map(|done| {
            let mut message = String::from("Capture completed.");
            for p in &done {
                let _ = write!(message, " {}: {}/{}", p.class_name, p.captured, p.target);
            }
            ControlReply::ok(message)
        }),
        Command::Abort => Ok(match studio.abort_capture() {
            Some(p) => ControlReply::ok(format!(
                "Capture of '{}' aborted at {}/{}.",
                p.class_name, p.captured, p.target
            )),
            None => ControlReply::ok("No capture running."),
        }),
        Command::ExportData => studio
            .export_dataset()
            .map(|path| ControlReply::ok(format!("Dataset written to {}.", path.display()))),
        Command::ExportModel(dest) => studio.export_model().and_then(|bytes| {
            fs::write(dest, &bytes)?;
            Ok(ControlReply::ok(format!(
                "Model ({} bytes) copied to {}.",
                bytes.len(),
                dest.display()
            )))
        }),
        Command::LoadData => studio
            .reload_dataset()
            .map(|rows| ControlReply::ok(format!("Loaded {} samples.", rows))),
        Command::Clear => studio
            .clear_dataset()
            .map(|rows| ControlReply::ok(format!("Dropped {} samples.", rows))),
        Command::Train => studio.train_model().map(|report| ControlReply {
            success: true,
            message: format!(
                "Model trained successfully ({} train / {} test rows, classes: {}).",
                report.train_rows,
                report.test_rows,
                report.classes.join(", ")
            ),
            accuracy: Some(report.accuracy),
        }),
        Command::Predict(true) => studio
            .start_prediction()
            .map(|()| ControlReply::ok("Prediction started.")),
        Command::Predict(false) => {
            studio.stop_prediction();
            Ok(ControlReply::ok("Prediction stopped."))
        }
        Command::Status => Ok(ControlReply::ok(
            serde_json::to_string_pretty(&studio.status()).unwrap_or_else(|e| e.to_string()),
        )),
        Command::Help => Ok(ControlReply::ok(HELP)),
        Command::Quit => Ok(ControlReply::ok("Shutting down.")),
    };

    result.unwrap_or_else(|err| {
        warn!("{:?} failed: {}", command, err);
        ControlReply::failed(&err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DecisionTreeTrainer;
    use crate::store::ArtifactStore;
    use crate::studio::StudioSettings;

    fn studio(dir: &tempfile::TempDir) -> Studio {
        let store = ArtifactStore::new(dir.path(), "data.csv", "model.bin").unwrap();
        Studio::new(
            store,
            Box::new(DecisionTreeTrainer::default()),
            StudioSettings::default(),
        )
    }

    #[test]
    fn parses_capture_lists() {
        let cmd = parse("capture happy, sad ,surprised 20").unwrap().unwrap();
        let Command::Capture(req) = &cmd else {
            panic!("expected capture, got {:?}", cmd);
        };
        assert_eq!(req.classes(), ["happy", "sad", "surprised"]);
        assert_eq!(req.samples_per_class(), 20);
        assert!(cmd_is_blocking("capture a 1"));
    }

    fn cmd_is_blocking(line: &str) -> bool {
        parse(line).unwrap().unwrap().is_blocking()
    }

    #[test]
    fn rejects_bad_capture_requests() {
        for line in ["capture happy -5", "capture happy 0", "capture happy lots", "capture 10", "capture , 3"] {
            assert!(
                matches!(parse(line), Err(Error::InvalidArgument(_))),
                "{line} should be rejected"
            );
        }
    }

    #[test]
    fn parses_the_other_verbs() {
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(parse("PREDICT on").unwrap(), Some(Command::Predict(true)));
        assert_eq!(parse("stop").unwrap(), Some(Command::Predict(false)));
        assert_eq!(
            parse("export model /tmp/m.bin").unwrap(),
            Some(Command::ExportModel(PathBuf::from("/tmp/m.bin")))
        );
        assert_eq!(parse("load data").unwrap(), Some(Command::LoadData));
        assert!(parse("export everything").is_err());
        assert!(parse("dance").is_err());
    }

    #[test]
    fn failures_become_unsuccessful_replies() {
        let dir = tempfile::tempdir().unwrap();
        let studio = studio(&dir);

        let reply = execute(&studio, &Command::Train);
        assert!(!reply.success);
        assert!(reply.message.contains("No dataset found"));

        let reply = execute(&studio, &Command::Predict(true));
        assert!(!reply.success);
        assert!(reply.message.contains("Train the model first"));

        let reply = execute(&studio, &Command::Predict(false));
        assert_eq!(reply, ControlReply::ok("Prediction stopped."));
        assert_eq!(reply.to_json(), r#"{"success":true,"message":"Prediction stopped."}"#);
    }

    #[test]
    fn export_data_writes_header_only_csv() {
        let dir = tempfile::tempdir().unwrap();
        let studio = studio(&dir);

        let reply = execute(&studio, &Command::ExportData);
        assert!(reply.success, "{}", reply.message);
        let csv = fs::read_to_string(dir.path().join("data.csv")).unwrap();
        assert_eq!(csv.lines().count(), 1);
        assert!(csv.starts_with("label,0_x,0_y,0_z,"));
        assert!(csv.trim_end().ends_with("467_z"));
    }

    #[test]
    fn status_is_json() {
        let dir = tempfile::tempdir().unwrap();
        let studio = studio(&dir);
        let reply = execute(&studio, &Command::Status);
        let value: serde_json::Value = serde_json::from_str(&reply.message).unwrap();
        assert_eq!(value["mode"], "Idle");
        assert_eq!(value["health"]["state"], "starting");
    }
}
