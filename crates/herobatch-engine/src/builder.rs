use herobatch_contracts::batch::{FileState, GenerationRequest, RemoteFile};
use herobatch_contracts::prompt::{build_image_prompt, DEFAULT_COPY_LANGUAGE};
use herobatch_contracts::records::{FailureReason, ProductRecord, RecordFailure};

use crate::fetch::FetchedAsset;
use crate::poll::{PollOutcome, PollPolicy, PollStep};
use crate::services::{error_chain_text, GenerationService};

/// Uploads a fetched asset and turns the record into one batch request.
pub struct RequestBuilder<'a> {
    service: &'a dyn GenerationService,
    poll: PollPolicy,
    copy_language: &'a str,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(service: &'a dyn GenerationService, poll: PollPolicy) -> Self {
        Self {
            service,
            poll,
            copy_language: DEFAULT_COPY_LANGUAGE,
        }
    }

    pub fn with_copy_language(mut self, copy_language: &'a str) -> Self {
        self.copy_language = copy_language;
        self
    }

    pub fn build(
        &self,
        record: &ProductRecord,
        asset: &FetchedAsset,
    ) -> Result<GenerationRequest, RecordFailure> {
        let display_name = format!("sku-{}", record.key);
        let uploaded = self
            .service
            .upload_file(&asset.path, asset.media_type.mime(), &display_name)
            .map_err(|err| {
                RecordFailure::new(FailureReason::UploadFailed, error_chain_text(&err, 400))
            })?;
        let file = self.wait_until_processed(uploaded)?;

        Ok(GenerationRequest {
            key: record.key.clone(),
            file_uri: file.reference().to_string(),
            mime_type: asset.media_type.mime().to_string(),
            prompt: build_image_prompt(&record.name, &record.description, self.copy_language),
        })
    }

    fn wait_until_processed(&self, uploaded: RemoteFile) -> Result<RemoteFile, RecordFailure> {
        let file = if uploaded.state == FileState::Processing {
            let name = uploaded.name.clone();
            let outcome = self
                .poll
                .wait(|_| {
                    let file = self.service.get_file(&name)?;
                    Ok(match file.state {
                        FileState::Processing => PollStep::Waiting("PROCESSING".to_string()),
                        _ => PollStep::Done(file),
                    })
                })
                .map_err(|err| {
                    RecordFailure::new(FailureReason::UploadFailed, error_chain_text(&err, 400))
                })?;
            match outcome {
                PollOutcome::Ready(file) => file,
                PollOutcome::TimedOut { elapsed, .. } => {
                    return Err(RecordFailure::new(
                        FailureReason::Timeout,
                        format!(
                            "{name} still processing after {:.1}s",
                            elapsed.as_secs_f64()
                        ),
                    ))
                }
            }
        } else {
            uploaded
        };

        if file.state == FileState::Failed {
            return Err(RecordFailure::new(
                FailureReason::UploadFailed,
                format!("remote processing failed for {}", file.name),
            ));
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use anyhow::bail;
    use herobatch_contracts::batch::{BatchJob, FileState, RemoteFile};
    use herobatch_contracts::records::{ColumnMap, FailureReason, ProductRecord};
    use indexmap::IndexMap;

    use crate::fetch::{FetchedAsset, MediaType};
    use crate::poll::PollPolicy;
    use crate::services::GenerationService;

    use super::RequestBuilder;

    /// Upload answers with `uploaded`; every later status check answers with `polled`.
    struct FileStates {
        uploaded: Option<FileState>,
        polled: FileState,
        uri: Option<&'static str>,
    }

    impl GenerationService for FileStates {
        fn name(&self) -> &str {
            "file-states"
        }

        fn upload_file(&self, _path: &Path, _mime: &str, display_name: &str) -> anyhow::Result<RemoteFile> {
            let Some(state) = self.uploaded.clone() else {
                bail!("HTTP 503 while uploading {display_name}");
            };
            Ok(RemoteFile {
                name: "files/abc".to_string(),
                uri: self.uri.map(str::to_string),
                mime_type: None,
                state,
            })
        }

        fn get_file(&self, name: &str) -> anyhow::Result<RemoteFile> {
            Ok(RemoteFile {
                name: name.to_string(),
                uri: self.uri.map(str::to_string),
                mime_type: None,
                state: self.polled.clone(),
            })
        }

        fn create_batch(&self, _: &str, _: &str, _: &str) -> anyhow::Result<BatchJob> {
            bail!("not used")
        }

        fn get_batch(&self, _: &str) -> anyhow::Result<BatchJob> {
            bail!("not used")
        }

        fn download_file(&self, _: &str) -> anyhow::Result<Vec<u8>> {
            bail!("not used")
        }
    }

    fn record() -> ProductRecord {
        let cells: IndexMap<String, String> = [
            ("SKU", "K-1"),
            ("productName", "Teapot"),
            ("description", "Cast iron"),
            ("imageURL", "https://cdn.test/k.png"),
        ]
        .into_iter()
        .map(|(column, value)| (column.to_string(), value.to_string()))
        .collect();
        ProductRecord::from_row(0, cells, &ColumnMap::default())
    }

    fn asset() -> FetchedAsset {
        FetchedAsset {
            key: "K-1".to_string(),
            path: PathBuf::from("/nonexistent/K-1.png"),
            media_type: MediaType::Png,
        }
    }

    fn policy() -> PollPolicy {
        PollPolicy::immediate(Duration::from_secs(2))
    }

    #[test]
    fn processing_file_is_polled_until_active() -> anyhow::Result<()> {
        let service = FileStates {
            uploaded: Some(FileState::Processing),
            polled: FileState::Active,
            uri: Some("https://files.test/abc"),
        };
        let request = RequestBuilder::new(&service, policy())
            .build(&record(), &asset())
            .map_err(|failure| anyhow::anyhow!("{failure:?}"))?;
        assert_eq!(request.key, "K-1");
        assert_eq!(request.file_uri, "https://files.test/abc");
        assert_eq!(request.mime_type, "image/png");
        assert!(request.prompt.contains("Teapot"));
        assert!(request.prompt.contains("Traditional Chinese (Taiwan)"));
        Ok(())
    }

    #[test]
    fn copy_language_reaches_the_prompt() -> anyhow::Result<()> {
        let service = FileStates {
            uploaded: Some(FileState::Active),
            polled: FileState::Active,
            uri: None,
        };
        let request = RequestBuilder::new(&service, policy())
            .with_copy_language("English")
            .build(&record(), &asset())
            .map_err(|failure| anyhow::anyhow!("{failure:?}"))?;
        assert!(request.prompt.contains("Write every word on the image in English"));
        Ok(())
    }

    #[test]
    fn file_name_stands_in_for_missing_uri() -> anyhow::Result<()> {
        let service = FileStates {
            uploaded: Some(FileState::Active),
            polled: FileState::Active,
            uri: None,
        };
        let request = RequestBuilder::new(&service, policy())
            .build(&record(), &asset())
            .map_err(|failure| anyhow::anyhow!("{failure:?}"))?;
        assert_eq!(request.file_uri, "files/abc");
        Ok(())
    }

    #[test]
    fn upload_errors_and_failed_files_are_upload_failed() {
        let broken = FileStates {
            uploaded: None,
            polled: FileState::Active,
            uri: None,
        };
        let failure = RequestBuilder::new(&broken, policy())
            .build(&record(), &asset())
            .unwrap_err();
        assert_eq!(failure.reason, FailureReason::UploadFailed);
        assert!(failure.detail.contains("503"));

        let rejected = FileStates {
            uploaded: Some(FileState::Processing),
            polled: FileState::Failed,
            uri: None,
        };
        let failure = RequestBuilder::new(&rejected, policy())
            .build(&record(), &asset())
            .unwrap_err();
        assert_eq!(failure.reason, FailureReason::UploadFailed);
    }

    #[test]
    fn endless_processing_is_timeout() {
        let stuck = FileStates {
            uploaded: Some(FileState::Processing),
            polled: FileState::Processing,
            uri: None,
        };
        let failure = RequestBuilder::new(&stuck, PollPolicy::immediate(Duration::ZERO))
            .build(&record(), &asset())
            .unwrap_err();
        assert_eq!(failure.reason, FailureReason::Timeout);
    }
}
