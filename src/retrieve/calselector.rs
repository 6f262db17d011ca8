//! CalSelector client: finds calibration files associated to datasets.
//!
//! The service answers a POST of dataset ids with one XML association tree
//! per dataset: `application/xml` for a single input, a `multipart/form-data`
//! body with one XML part per dataset otherwise. Only the `<file name=…>`
//! entries are of interest here.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::Client;
use tracing::{debug, info, warn};

use super::error::RetrieveError;
use super::filename::filename_from_content_disposition;

/// Which calibration products to associate with a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibScope {
    /// Raw calibrations (`Raw2Raw`).
    Raw,
    /// Processed calibrations (`Raw2Master`).
    Processed,
}

impl CalibScope {
    /// The CalSelector `mode` parameter for this scope.
    #[must_use]
    pub fn mode_param(self) -> &'static str {
        match self {
            Self::Raw => "Raw2Raw",
            Self::Processed => "Raw2Master",
        }
    }
}

impl FromStr for CalibScope {
    type Err = RetrieveError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "raw" => Ok(Self::Raw),
            "processed" => Ok(Self::Processed),
            other => Err(RetrieveError::InvalidCalibScope {
                value: other.to_string(),
            }),
        }
    }
}

/// Client for the calibration-association service.
#[derive(Debug, Clone)]
pub struct CalSelectorClient {
    client: Client,
    url: String,
}

impl CalSelectorClient {
    /// Creates a client posting to `url` with a shared HTTP client.
    #[must_use]
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Looks up the calibration files associated to `datasets`.
    ///
    /// Input ids are removed from the result; remaining names are unique
    /// and sorted. When `save_xml_to` is given, each association tree is
    /// written there under its service-reported filename.
    ///
    /// # Errors
    ///
    /// Returns [`RetrieveError`] on transport failures, unexpected content
    /// types, or unparseable trees.
    pub async fn associated_files(
        &self,
        datasets: &[String],
        scope: CalibScope,
        save_xml_to: Option<&Path>,
    ) -> Result<Vec<String>, RetrieveError> {
        let mut form: Vec<(&str, &str)> =
            datasets.iter().map(|id| ("dp_id", id.as_str())).collect();
        let mode = scope.mode_param();
        form.push(("mode", mode));

        debug!(url = %self.url, datasets = datasets.len(), mode, "querying CalSelector");
        let response = self
            .client
            .post(&self.url)
            .form(&form)
            .send()
            .await
            .map_err(|e| RetrieveError::network(&self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrieveError::http_status(&self.url, status.as_u16(), None));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let disposition = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| RetrieveError::network(&self.url, e))?;

        let mut associated: BTreeSet<String> = BTreeSet::new();
        if content_type.contains("application/xml") {
            associated.extend(files_in_association_tree(&body)?);
            if let Some(dir) = save_xml_to {
                let filename = disposition
                    .as_deref()
                    .and_then(filename_from_content_disposition)
                    .unwrap_or_else(|| "associations.xml".to_string());
                save_tree(dir, &filename, &body);
            }
        } else if content_type.contains("multipart/form-data") {
            let boundary = boundary_of(&content_type).ok_or_else(|| {
                RetrieveError::calselector("multipart response without a boundary")
            })?;
            for part in split_multipart(&body, &boundary) {
                associated.extend(files_in_association_tree(&part.body)?);
                if let Some(dir) = save_xml_to {
                    let filename = part
                        .filename
                        .unwrap_or_else(|| "associations.xml".to_string());
                    save_tree(dir, &filename, &part.body);
                }
            }
        } else {
            return Err(RetrieveError::calselector(format!(
                "unexpected content type '{content_type}'"
            )));
        }

        // The caller asked about these; only report what they do not have.
        for dataset in datasets {
            associated.remove(dataset);
        }
        Ok(associated.into_iter().collect())
    }
}

/// Extracts the unique `<file name=…>` entries from an association tree.
fn files_in_association_tree(xml: &str) -> Result<BTreeSet<String>, RetrieveError> {
    let mut reader = Reader::from_str(xml);
    let mut files = BTreeSet::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                if element.name().as_ref() == b"file" {
                    for attribute in element.attributes().flatten() {
                        if attribute.key.as_ref() == b"name" {
                            files.insert(String::from_utf8_lossy(&attribute.value).into_owned());
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(error) => {
                return Err(RetrieveError::calselector(format!(
                    "unparseable association tree: {error}"
                )));
            }
        }
    }
    Ok(files)
}

struct MultipartPart {
    filename: Option<String>,
    body: String,
}

/// Boundary parameter of a multipart content type, unquoted.
fn boundary_of(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        (key.eq_ignore_ascii_case("boundary"))
            .then(|| value.trim_matches('"').to_string())
    })
}

/// Splits a multipart body into parts, pulling each part's filename out of
/// its `Content-Disposition` header.
fn split_multipart(body: &str, boundary: &str) -> Vec<MultipartPart> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    for raw_part in body.split(delimiter.as_str()).skip(1) {
        let raw_part = raw_part.trim_start_matches(['\r', '\n']);
        if raw_part.starts_with("--") || raw_part.is_empty() {
            continue;
        }
        let (headers, payload) = match raw_part
            .split_once("\r\n\r\n")
            .or_else(|| raw_part.split_once("\n\n"))
        {
            Some(split) => split,
            None => ("", raw_part),
        };
        let filename = headers
            .lines()
            .find(|line| line.to_ascii_lowercase().starts_with("content-disposition"))
            .and_then(filename_from_content_disposition);
        parts.push(MultipartPart {
            filename,
            body: payload.trim_end_matches(['\r', '\n']).to_string(),
        });
    }
    parts
}

fn save_tree(dir: &Path, filename: &str, xml: &str) {
    if let Err(error) = std::fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), %error, "cannot create association tree directory");
        return;
    }
    let path = dir.join(filename);
    match std::fs::write(&path, xml) {
        Ok(()) => info!(path = %path.display(), "saved association tree"),
        Err(error) => warn!(path = %path.display(), %error, "failed to save association tree"),
    }
}
