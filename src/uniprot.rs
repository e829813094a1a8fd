use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::config::DownloadConfig;
use crate::domain::SpeciesDescriptor;
use crate::error::TreeError;

/// Where raw per-species datasets come from. Implementations write the
/// compressed dataset to `destination` and return the number of bytes written.
pub trait DatasetSource: Send + Sync {
    fn fetch(&self, descriptor: &SpeciesDescriptor, destination: &Path) -> Result<u64, TreeError>;
}

impl<S: DatasetSource + ?Sized> DatasetSource for &S {
    fn fetch(&self, descriptor: &SpeciesDescriptor, destination: &Path) -> Result<u64, TreeError> {
        (**self).fetch(descriptor, destination)
    }
}

#[derive(Clone)]
pub struct UniprotProteomeSource {
    client: Client,
    url_template: String,
}

impl UniprotProteomeSource {
    pub fn new(config: &DownloadConfig) -> Result<Self, TreeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("protein-tree/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TreeError::DownloadHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| TreeError::DownloadHttp(err.to_string()))?;
        Ok(Self {
            client,
            url_template: config.url_template.clone(),
        })
    }

    pub fn dataset_url(&self, descriptor: &SpeciesDescriptor) -> String {
        dataset_url(&self.url_template, descriptor)
    }

    fn write_response_to_file(
        &self,
        mut response: reqwest::blocking::Response,
        destination: &Path,
    ) -> Result<u64, TreeError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "UniProt request failed".to_string());
            return Err(TreeError::DownloadStatus { status, message });
        }
        let mut file =
            File::create(destination).map_err(|err| TreeError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| TreeError::DownloadHttp(err.to_string()))
    }
}

impl DatasetSource for UniprotProteomeSource {
    fn fetch(&self, descriptor: &SpeciesDescriptor, destination: &Path) -> Result<u64, TreeError> {
        let url = self.dataset_url(descriptor);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| TreeError::DownloadHttp(err.to_string()))?;
        self.write_response_to_file(response, destination)
    }
}

pub fn dataset_url(template: &str, descriptor: &SpeciesDescriptor) -> String {
    template.replace("{proteome_id}", &descriptor.proteome_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_uses_proteome_id() {
        let descriptor = SpeciesDescriptor {
            species_key: "9606-human".to_string(),
            species_id: "9606".parse().unwrap(),
            species_label: "Homo sapiens".to_string(),
            active_taxa: String::new(),
            group: "vertebrate".to_string(),
            proteome_id: "UP000005640".to_string(),
        };
        let url = dataset_url(&DownloadConfig::default().url_template, &descriptor);
        assert!(url.ends_with("query=proteome:UP000005640"));
        assert!(url.contains("compressed=true"));
    }
}
