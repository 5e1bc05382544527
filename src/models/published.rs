//! Represents files published to the public upload directory.

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;

/// Who uploaded a file and when; prefixed onto every published filename.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribution {
    /// Remote address of the uploading client.
    pub client_addr: String,

    /// Calendar date of the upload.
    pub date: NaiveDate,
}

impl Attribution {
    pub fn new(client_addr: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            client_addr: client_addr.into(),
            date,
        }
    }

    /// Attribution for `client_addr` on the server's current local date.
    pub fn today(client_addr: impl Into<String>) -> Self {
        Self::new(client_addr, Local::now().date_naive())
    }

    /// Address with separator characters replaced, safe to embed in a filename.
    pub fn safe_addr(&self) -> String {
        self.client_addr
            .chars()
            .map(|c| match c {
                '/' | '\\' | '_' | '\0' => '-',
                other => other,
            })
            .collect()
    }

    pub fn date_string(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// `{client_addr}_{yyyy-mm-dd}_`
    pub fn prefix(&self) -> String {
        format!("{}_{}_", self.safe_addr(), self.date_string())
    }
}

/// A published file as surfaced to its uploader.
#[derive(Serialize, Clone, Debug)]
pub struct PublishedFile {
    /// Original filename, without the attribution prefix.
    pub name: String,

    /// Actual filename in the upload directory.
    pub stored_name: String,

    /// Size in bytes.
    pub size: u64,

    /// Last modification time.
    pub modified: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_joins_address_and_date() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(Attribution::new("1.2.3.4", date).prefix(), "1.2.3.4_2024-01-01_");
        assert_eq!(
            Attribution::new("odd_host/x", date).prefix(),
            "odd-host-x_2024-01-01_"
        );
    }
}
