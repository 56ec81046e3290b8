//! Builds the crawler from loaded configuration.
use crate::crawl::{CrawlError, Crawler};
use anyhow::Result;
use murmur_bus::log_bus::LoggingBus;
use murmur_bus::pubsub::{self, PubSubTopic};
use murmur_bus::token::{MetadataToken, NoToken, StaticToken, TokenSource};
use murmur_bus::{BusError, FanOutPublisher, MessageBus};
use murmur_config::{MurmurConfig, PubSubConfig};
use murmur_social::TwitterApi;
use std::sync::Arc;
use time::Duration;

/// Pub/Sub topic client for the configured project.
///
/// An emulator endpoint (`PUBSUB_EMULATOR_HOST` or `pubsub.endpoint`) gets no
/// token; otherwise a configured static token wins over the metadata server.
pub fn topic_bus(cfg: &PubSubConfig) -> Result<PubSubTopic, CrawlError> {
    let client_err = |source: BusError| CrawlError::Client {
        project: cfg.project_id.clone(),
        source,
    };

    let endpoint = cfg
        .endpoint_override()
        .map(str::to_string)
        .or_else(pubsub::emulator_endpoint);
    let tokens: Arc<dyn TokenSource> = match (&endpoint, cfg.static_token()) {
        (Some(_), _) => Arc::new(NoToken),
        (None, Some(token)) => Arc::new(StaticToken::new(token)),
        (None, None) => Arc::new(MetadataToken::from_env().map_err(client_err)?),
    };
    let endpoint = endpoint.as_deref().unwrap_or(pubsub::PUBSUB_API_BASE);

    let topic = PubSubTopic::new(&cfg.project_id, &cfg.topic_id, endpoint, tokens)
        .map_err(client_err)?
        .with_retries(cfg.retries);
    tracing::debug!(topic = topic.destination(), endpoint, "pubsub.client_ready");
    Ok(topic)
}

pub fn build_crawler(cfg: &MurmurConfig, dry_run: bool) -> Result<Crawler> {
    let bus: Arc<dyn MessageBus> = if dry_run {
        Arc::new(LoggingBus::new(format!(
            "projects/{}/topics/{}",
            cfg.pubsub.project_id, cfg.pubsub.topic_id
        )))
    } else {
        Arc::new(topic_bus(&cfg.pubsub)?)
    };

    let publisher = FanOutPublisher::new(bus)
        .with_max_in_flight(cfg.pubsub.max_in_flight)
        .with_id_attribute(cfg.pubsub.attach_id_attribute);

    let search = &cfg.search;
    let fetcher = TwitterApi::with_base_url(&search.endpoint, search.bearer_token.clone())?
        .with_retries(search.retries);

    let lag = Duration::seconds(i64::try_from(search.window_lag_secs)?);
    let width = Duration::seconds(i64::try_from(search.window_width_secs)?);
    Ok(Crawler::new(Arc::new(fetcher), publisher)
        .with_query(search.query.clone(), search.max_results)
        .with_window(lag, width))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pubsub_cfg(project: &str, endpoint: Option<&str>) -> PubSubConfig {
        PubSubConfig {
            project_id: project.to_string(),
            topic_id: "tweets".to_string(),
            endpoint: endpoint.map(str::to_string),
            access_token: Some("tok".to_string()),
            attach_id_attribute: false,
            max_in_flight: 64,
            retries: 2,
        }
    }

    #[test]
    fn explicit_endpoint_builds_topic() {
        let topic = topic_bus(&pubsub_cfg("proj", Some("http://localhost:8085"))).unwrap();
        assert_eq!(topic.destination(), "projects/proj/topics/tweets");
    }

    #[test]
    fn bad_project_is_a_client_error_naming_it() {
        let err = topic_bus(&pubsub_cfg("bad/project", Some("http://localhost:8085"))).unwrap_err();
        assert!(matches!(
            &err,
            CrawlError::Client { project, source: BusError::InvalidTopic(_) } if project == "bad/project"
        ));
        assert!(
            err.to_string()
                .starts_with("creating pub/sub client for project bad/project failed:")
        );
    }
}
