use std::path::PathBuf;
use std::time::Duration;

use herobatch_contracts::prompt::DEFAULT_COPY_LANGUAGE;
use herobatch_contracts::records::{ColumnMap, SheetFormat};

use crate::poll::PollPolicy;

pub const DEFAULT_MODEL: &str = "gemini-3-pro-image-preview";
pub const DEFAULT_DISPLAY_NAME: &str = "herobatch-hero-images";
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything one run needs, assembled once by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub input_path: PathBuf,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub skip_report_path: PathBuf,
    pub columns: ColumnMap,
    pub model: String,
    pub display_name: String,
    /// Language of the text drawn onto generated images.
    pub copy_language: String,
    pub download_timeout: Duration,
    pub asset_poll: PollPolicy,
    pub batch_poll: PollPolicy,
}

impl PipelineConfig {
    /// Defaults with every output placed under `work_dir`. The skip report
    /// uses the input's format: workbook in, workbook out.
    pub fn new(input_path: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        let input_path = input_path.into();
        let work_dir = work_dir.into();
        let report_extension = SheetFormat::from_path(&input_path).report_extension();
        Self {
            skip_report_path: work_dir.join(format!("skipped_products.{report_extension}")),
            input_path,
            output_dir: work_dir.join("output_images"),
            work_dir,
            columns: ColumnMap::default(),
            model: DEFAULT_MODEL.to_string(),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            copy_language: DEFAULT_COPY_LANGUAGE.to_string(),
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            asset_poll: PollPolicy::asset_processing(),
            batch_poll: PollPolicy::batch_job(),
        }
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.work_dir.join("tmp_base_images")
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.work_dir.join("image_batch.jsonl")
    }

    pub fn events_path(&self) -> PathBuf {
        self.work_dir.join("events.jsonl")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.work_dir.join("summary.json")
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::{PipelineConfig, DEFAULT_MODEL};

    #[test]
    fn outputs_default_under_work_dir() {
        let config = PipelineConfig::new("products.csv", "/tmp/run");
        assert_eq!(config.output_dir, Path::new("/tmp/run/output_images"));
        assert_eq!(
            config.skip_report_path,
            Path::new("/tmp/run/skipped_products.csv")
        );
        assert_eq!(config.tmp_dir(), Path::new("/tmp/run/tmp_base_images"));
        assert_eq!(config.artifact_path(), Path::new("/tmp/run/image_batch.jsonl"));
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.download_timeout, Duration::from_secs(30));
        assert_eq!(
            config.batch_poll.max_elapsed,
            Duration::from_secs(24 * 60 * 60)
        );
        assert_eq!(config.copy_language, "Traditional Chinese (Taiwan)");
    }

    #[test]
    fn workbook_input_gets_workbook_skip_report() {
        let config = PipelineConfig::new("products.xlsx", "/tmp/run");
        assert_eq!(
            config.skip_report_path,
            Path::new("/tmp/run/skipped_products.xlsx")
        );
    }
}
