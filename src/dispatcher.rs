//! Content dispatcher: routes a decoded request to the streamer, manifest
//! rewriter, or generic processor based on a probe of the target.
//!
//! Grounded on the original `content_processor.py` (`ContentProcessor`).

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{HeaderMap, Response};
use bytes::Bytes;
use reqwest::Method;
use tracing::info;

use crate::config::Config;
use crate::generic::{self, CapturedResponse};
use crate::http_client::ClientFactory;
use crate::manifest;
use crate::prober::{self, ClassifierVocab, ContentClass};
use crate::proxy_pool::SharedProxyPool;
use crate::streaming;

pub enum DispatchOutcome {
    Stream(Response<Body>),
    Captured(CapturedResponse),
}

#[allow(clippy::too_many_arguments)]
pub async fn dispatch(
    method: &Method,
    target_url: &str,
    inbound_headers: &HeaderMap,
    header_overlay: &HashMap<String, String>,
    range_header: Option<&str>,
    body: Option<&Bytes>,
    config: &Config,
    factory: &ClientFactory,
    proxy_pool: &SharedProxyPool,
) -> DispatchOutcome {
    if method != Method::GET {
        let captured = generic::process_request(
            target_url,
            method,
            body,
            header_overlay,
            config,
            factory,
            proxy_pool,
        )
        .await;
        return DispatchOutcome::Captured(captured);
    }

    let probe_client = match factory.acquire(
        Default::default(),
        true,
        false,
        None,
        std::time::Duration::from_secs_f64(config.timeout_connect + config.timeout_read),
    ) {
        Ok(c) => c,
        Err(_) => {
            let captured = generic::process_request(
                target_url,
                method,
                None,
                header_overlay,
                config,
                factory,
                proxy_pool,
            )
            .await;
            return DispatchOutcome::Captured(captured);
        }
    };

    let probe_headers = header_overlay_to_headermap(header_overlay);
    let info = prober::probe(&probe_client, target_url, &probe_headers, true, proxy_pool, None).await;

    if manifest::looks_like_m3u8(&info, &info.body_prefix) {
        info!("dispatching to manifest rewriter: {}", target_url);
        let captured = manifest::process(target_url, header_overlay, config, factory, proxy_pool).await;
        return DispatchOutcome::Captured(captured);
    }

    let vocab = ClassifierVocab {
        video_extensions: &config.video_extensions,
        video_patterns: &config.video_patterns,
        video_indicators: &config.video_indicators,
        video_content_types: &config.video_content_types,
    };
    let (class, lossy) = prober::classify(target_url, &info, &vocab);

    match class {
        ContentClass::M3u8 => {
            info!("dispatching to manifest rewriter: {}", target_url);
            let captured = manifest::process(target_url, header_overlay, config, factory, proxy_pool).await;
            DispatchOutcome::Captured(captured)
        }
        ContentClass::Video => {
            if lossy {
                info!(
                    "classified {} as video via size+range heuristic (lossy signal)",
                    target_url
                );
            }
            info!("dispatching to range streamer: {}", target_url);
            let response = streaming::stream_video(
                target_url,
                inbound_headers,
                header_overlay,
                range_header,
                info.content_length,
                &info.content_type,
                config,
                factory,
                proxy_pool,
            )
            .await;
            DispatchOutcome::Stream(response)
        }
        ContentClass::Generic => {
            info!("dispatching to generic processor: {}", target_url);
            let captured = generic::process_request(
                target_url,
                method,
                None,
                header_overlay,
                config,
                factory,
                proxy_pool,
            )
            .await;
            DispatchOutcome::Captured(captured)
        }
    }
}

fn header_overlay_to_headermap(overlay: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in overlay {
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::from_bytes(k.as_bytes()),
            axum::http::HeaderValue::from_str(v),
        ) {
            map.insert(name, value);
        }
    }
    map
}
