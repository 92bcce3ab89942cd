//! Storefront E2E: browser test harness for e-commerce journeys
//!
//! The crate supplies the pieces a browser test of a storefront needs around
//! the browser itself: retrying flaky steps, recording network traffic,
//! step-by-step reports with screenshots, layered configuration and
//! domain assertions. [`TestRunner`] composes them into lazily created
//! per-test fixtures.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      TestRunner / TestContext                │
//! │  ┌──────────────┐ ┌───────────────┐ ┌─────────────────────┐  │
//! │  │ TestReporter │ │ NetworkLogger │ │ RetryHelper         │  │
//! │  │ steps, HTML  │ │ events, waits │ │ backoff, strategies │  │
//! │  └──────┬───────┘ └───────┬───────┘ └─────────────────────┘  │
//! │         │                 │        ┌─────────────────────┐   │
//! │         │                 │        │ CustomAssertions    │   │
//! │         ▼                 ▼        └──────────┬──────────┘   │
//! │  ┌─────────────────────────────────────────────▼──────────┐  │
//! │  │ BrowserPage (CdpPage with `browser`, MockPage in tests) │  │
//! │  └─────────────────────────────────────────────────────────┘  │
//! │                     ConfigManager (YAML + env)               │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

mod assertions;
mod config;
mod fixture;
mod network;
mod page;
mod reporter;
mod result;
mod retry;
mod summary;

/// Chromium launch options and the CDP-backed page (feature `browser`)
pub mod browser;

/// Log subscriber setup
pub mod logging;

/// In-memory browser for tests
#[allow(clippy::missing_panics_doc)]
pub mod mock;

pub use assertions::{
    parse_price, CartItem, CustomAssertions, OrderConfirmation, Product, ProductCriteria,
    LOGGED_IN_SELECTOR,
};
pub use browser::LaunchOptions;
#[cfg(feature = "browser")]
pub use browser::{CdpBrowser, CdpPage};
pub use config::{
    merge_configs, parse_dotenv, ConfigManager, ConfigSources, DEFAULT_ENVIRONMENT, ENV_PREFIX,
    ENV_SELECTOR,
};
pub use fixture::{
    BrowserHook, FixtureState, TestContext, TestFn, TestInfo, TestPage, TestRunner,
};
pub use logging::{init_tracing, LogFormat};
pub use mock::{MockBrowser, MockElement, MockPage, MOCK_PNG};
pub use network::{
    NetworkEvent, NetworkFilter, NetworkLogger, NetworkWait, RequestEvent, ResponseEvent,
};
pub use page::{
    Browser, BrowserPage, Cookie, ListenerId, ListenerRegistry, NetworkActivity, NetworkListener,
    ObservedRequest, ObservedResponse, ResourceType, SameSite, Viewport,
};
pub use reporter::{
    screenshot_slug, GeneratedReport, PerformanceMetrics, Report, Step, TestReporter,
    FAILURE_STEP, NETWORK_STEP, PERFORMANCE_STEP,
};
pub use result::{HarnessError, HarnessResult};
pub use retry::{
    strategy, BackoffMode, RetryHelper, RetryOptions, RetryPolicy, Strategy, WaitOptions,
};
pub use summary::{SuiteSummary, TestOutcome, TestStatus};

/// Prelude for test files
pub mod prelude {
    pub use crate::{
        strategy, Browser, BrowserPage, CartItem, ConfigManager, CustomAssertions, HarnessError,
        HarnessResult, MockBrowser, MockElement, NetworkFilter, NetworkLogger, OrderConfirmation,
        Product, ProductCriteria, ResourceType, RetryHelper, RetryOptions, TestContext,
        TestRunner, WaitOptions,
    };
    pub use futures::FutureExt as _;
}
