use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use image::{DynamicImage, ImageFormat};
use serde::Deserialize;
use serde_json::json;

use super::{Detection, DetectionFilter, Detector, DetectorIdentity, ScoredBox};
use crate::error::DetectionError;

/// Runs an external detection program once per image.
///
/// The image is written to the program's stdin as PNG. The program prints
/// `{"detections": [{"label": .., "confidence": .., "bbox": [..]}]}` on stdout and
/// exits with status 0.
pub struct CommandDetector {
    program: PathBuf,
    args: Vec<String>,
    model_version: String,
    filter: DetectionFilter,
}

#[derive(Debug, Deserialize)]
struct BackendOutput {
    detections: Vec<ScoredBox>,
}

impl CommandDetector {
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        model_version: Option<String>,
        filter: DetectionFilter,
    ) -> Self {
        Self {
            program,
            args,
            model_version: model_version.unwrap_or_else(|| "unversioned".into()),
            filter,
        }
    }

    fn encode(image: &DynamicImage) -> Result<Vec<u8>, DetectionError> {
        let mut buffer = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .map_err(|e| DetectionError::Input(e.to_string()))?;
        Ok(buffer)
    }

    fn invoke(&self, png: Vec<u8>) -> Result<Vec<u8>, DetectionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                DetectionError::Backend(format!("failed to start {}: {e}", self.program.display()))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DetectionError::Backend("stdin not captured".into()))?;
        // Write from a separate thread so a chatty backend cannot fill stdout and stall us.
        let writer = thread::spawn(move || stdin.write_all(&png));

        let output = child
            .wait_with_output()
            .map_err(|e| DetectionError::Backend(e.to_string()))?;

        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(DetectionError::Backend(format!("writing image: {e}"))),
            Err(_) => return Err(DetectionError::Backend("stdin writer panicked".into())),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DetectionError::Backend(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

pub(crate) fn parse_backend_output(stdout: &[u8]) -> Result<Vec<ScoredBox>, DetectionError> {
    let parsed: BackendOutput = serde_json::from_slice(stdout)
        .map_err(|e| DetectionError::MalformedOutput(e.to_string()))?;
    Ok(parsed.detections)
}

impl Detector for CommandDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Detection, DetectionError> {
        let png = Self::encode(image)?;
        let stdout = self.invoke(png)?;
        let boxes = parse_backend_output(&stdout)?;
        Detection::from_boxes(&boxes, &self.filter)
    }

    fn identity(&self) -> DetectorIdentity {
        let name = self
            .program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string());

        DetectorIdentity {
            name,
            version: self.model_version.clone(),
            config: json!({
                "backend": "command",
                "program": self.program.display().to_string(),
                "args": self.args,
                "targetLabel": self.filter.target_label,
                "confidenceThreshold": self.filter.confidence_threshold,
                "uncertainBelow": self.filter.uncertain_below,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_detections_with_and_without_boxes() {
        let stdout = br#"{"detections":[
            {"label":"person","confidence":0.9,"bbox":[1.0,2.0,30.0,40.0]},
            {"label":"chair","confidence":0.7}
        ]}"#;
        let boxes = parse_backend_output(stdout).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].bbox, Some([1.0, 2.0, 30.0, 40.0]));
        assert_eq!(boxes[1].label, "chair");
        assert_eq!(boxes[1].bbox, None);
    }

    #[test]
    fn garbage_output_is_malformed() {
        let err = parse_backend_output(b"loading model...").unwrap_err();
        assert!(matches!(err, DetectionError::MalformedOutput(_)));
    }

    #[test]
    fn missing_program_is_a_backend_error() {
        let detector = CommandDetector::new(
            PathBuf::from("/nonexistent/headcount-detector"),
            vec![],
            None,
            DetectionFilter::default(),
        );
        let image = DynamicImage::new_rgb8(4, 4);
        let err = detector.detect(&image).unwrap_err();
        assert!(matches!(err, DetectionError::Backend(_)));
    }

    #[test]
    fn identity_snapshots_configuration() {
        let detector = CommandDetector::new(
            PathBuf::from("/opt/models/yolo-people"),
            vec!["--fast".into()],
            Some("8n".into()),
            DetectionFilter::default(),
        );
        let identity = detector.identity();
        assert_eq!(identity.name, "yolo-people");
        assert_eq!(identity.version, "8n");
        assert_eq!(identity.config["args"][0], "--fast");
        assert_eq!(identity.config["targetLabel"], "person");
    }
}
