use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument};

use super::{DailyReport, ReportError};
use crate::config::ReportSinkConfig;

/// Destination of daily reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, report: &DailyReport) -> Result<(), ReportError>;
}

/// Build the sink selected by the configuration
pub fn from_config(config: &ReportSinkConfig) -> Box<dyn ReportSink> {
    match config {
        ReportSinkConfig::Log => Box::new(LogReportSink),
        ReportSinkConfig::File { directory } => Box::new(FileReportSink::new(directory.clone())),
        ReportSinkConfig::Webhook { url } => Box::new(WebhookReportSink::new(url.clone())),
    }
}

/// Writes the report summary to the log
pub struct LogReportSink;

#[async_trait]
impl ReportSink for LogReportSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, report: &DailyReport) -> Result<(), ReportError> {
        info!(
            date = %report.date,
            total = report.total_servers,
            online = report.online,
            offline = report.offline,
            undefined = report.undefined,
            "daily report: average uptime {:.2}%",
            report.average_uptime
        );

        for server in &report.servers {
            debug!(
                server_id = %server.server_id,
                status = %server.status,
                transitions = server.transitions,
                "uptime {:.2}%",
                server.uptime_percent
            );
        }

        Ok(())
    }
}

/// Stores each report as `report-YYYY-MM-DD.json` in a directory
pub struct FileReportSink {
    directory: PathBuf,
}

impl FileReportSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn path_for(&self, report: &DailyReport) -> PathBuf {
        self.directory
            .join(format!("report-{}.json", report.date.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl ReportSink for FileReportSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn deliver(&self, report: &DailyReport) -> Result<(), ReportError> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let path = self.path_for(report);
        let body = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&path, body).await?;

        info!("daily report written to {}", path.display());
        Ok(())
    }
}

/// POSTs the report as JSON
pub struct WebhookReportSink {
    client: Client,
    url: String,
}

impl WebhookReportSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ReportSink for WebhookReportSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    #[instrument(skip_all, fields(date = %report.date))]
    async fn deliver(&self, report: &DailyReport) -> Result<(), ReportError> {
        let response = self.client.post(&self.url).json(report).send().await?;

        if !response.status().is_success() {
            return Err(ReportError::WebhookStatus(response.status().as_u16()));
        }

        info!("successfully sent daily report webhook");
        Ok(())
    }
}
