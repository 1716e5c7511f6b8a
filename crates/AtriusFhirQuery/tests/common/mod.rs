#![allow(dead_code)]

pub mod fetcher;
pub mod fixtures;

pub use fetcher::ScriptedFetcher;
pub use fixtures::{bundle, care_plan, condition, medication_request, observation, patient};

use atrius_fhir_query::{FhirAssistant, QueryExecutor, ResilientTransport, Session, TransportConfig};
use chrono::NaiveDate;
use std::sync::Arc;

pub const TEST_SERVER: &str = "https://fhir.test.org/r4";

/// Assistant over `fetcher` with no alternates, proxies or sample data, so
/// every answer comes from the script.
pub fn scripted_assistant(fetcher: Arc<ScriptedFetcher>) -> FhirAssistant {
    let session = Arc::new(Session::new(TEST_SERVER));
    FhirAssistant::with_fetcher(fetcher, session, isolated_config())
}

/// Executor over `fetcher` whose age arithmetic runs on 2024-06-01.
pub fn scripted_executor(fetcher: Arc<ScriptedFetcher>) -> QueryExecutor {
    let session = Arc::new(Session::new(TEST_SERVER));
    let transport = ResilientTransport::new(fetcher, session, isolated_config());
    QueryExecutor::new(Arc::new(transport)).with_clock(|| NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
}

pub fn isolated_config() -> TransportConfig {
    TransportConfig {
        alternate_servers: Vec::new(),
        use_cors_proxies: false,
        local_sample: false,
        ..TransportConfig::default()
    }
}
