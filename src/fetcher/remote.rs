//! Registered remote source
//!
//! Combines a registry descriptor, the shared fetch client and the parser
//! the descriptor names.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::client::FetchClient;
use super::parser::DocumentParser;
use super::{EventSource, FetchError, FetchResult};
use crate::downloader::segment::{PacingMode, Segment};
use crate::registry::SourceDescriptor;
use crate::{Event, EventSummary};

/// An Eventor-style source reached over HTTP
pub struct RemoteSource {
    descriptor: SourceDescriptor,
    client: Arc<FetchClient>,
    parser: Arc<dyn DocumentParser>,
}

impl RemoteSource {
    /// Create a source from its descriptor
    pub fn new(
        descriptor: SourceDescriptor,
        client: Arc<FetchClient>,
        parser: Arc<dyn DocumentParser>,
    ) -> Self {
        Self {
            descriptor,
            client,
            parser,
        }
    }

    /// Descriptor this source was built from
    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }
}

#[async_trait]
impl EventSource for RemoteSource {
    fn code(&self) -> &str {
        self.descriptor.code()
    }

    async fn fetch_listing(
        &self,
        segment: &Segment,
        mode: PacingMode,
    ) -> FetchResult<Vec<EventSummary>> {
        let url = self.descriptor.listing_url();
        let params = self.descriptor.listing_params(segment.start, segment.end);
        let body = self.client.fetch(&url, &params, mode).await?;

        let summaries = self
            .parser
            .parse_listing(self.descriptor.code(), &body)
            .map_err(|e| FetchError::Parse {
                url: url.clone(),
                message: e.to_string(),
            })?;
        debug!(source = self.code(), year = segment.year, count = summaries.len(), "Parsed listing");
        Ok(summaries)
    }

    async fn fetch_detail(&self, summary: &EventSummary, mode: PacingMode) -> FetchResult<Event> {
        let url = self.descriptor.resolve_url(&summary.url);
        let params = self.descriptor.detail_params(&url);
        let body = self.client.fetch(&url, &params, mode).await?;

        self.parser
            .parse_detail(summary, &body)
            .map_err(|e| FetchError::Parse {
                url,
                message: e.to_string(),
            })
    }
}
