//! Upstream endpoint selection.

use flowcast_types::config::UpstreamConfig;
use flowcast_types::workflow::{MarketListing, ShelfStatus, TargetKind, UpstreamTarget};

/// Pick the endpoint for a request.
///
/// Resumes always go to the resume endpoint. Otherwise a bot without a
/// market listing, or with one taken off the shelf, runs in debug mode;
/// every other listed bot runs in production.
pub fn select_target(
    config: &UpstreamConfig,
    resume: bool,
    listing: Option<&MarketListing>,
) -> UpstreamTarget {
    let kind = if resume {
        TargetKind::Resume
    } else {
        match listing {
            None => TargetKind::Debug,
            Some(l) if l.status == ShelfStatus::OffShelf => TargetKind::Debug,
            Some(_) => TargetKind::Production,
        }
    };

    let url = match kind {
        TargetKind::Debug => &config.debug_url,
        TargetKind::Production => &config.chat_url,
        TargetKind::Resume => &config.resume_url,
    };

    UpstreamTarget {
        kind,
        url: url.clone(),
    }
}
