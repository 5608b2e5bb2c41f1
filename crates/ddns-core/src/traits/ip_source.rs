// # IP Source Trait
//
// One strategy in the IP detector's ordered chain.
//
// ## Implementations
//
// - HTTP echo services: `ddns-ip-http` crate
// - DNS echo resolver: `ddns-ip-dns` crate
// - Local interfaces: `ddns-ip-interface` crate
//
// ## Usage
//
// ```rust,ignore
// use ddns_core::{IpSource, model::IpFamily};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* IpSource implementation */;
//     let ip = source.detect(IpFamily::V4).await?;
//     println!("public address: {}", ip);
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::net::IpAddr;

use crate::model::{DetectionMethod, IpFamily};

/// Trait for IP detection strategies
///
/// A strategy performs exactly one attempt per call. It does not retry,
/// cache, or fall through to other strategies; the
/// [`IpDetector`](crate::detector::IpDetector) owns all of that and also
/// wraps each call in a timeout.
///
/// # Contract
///
/// - Return an address of the requested family or an error
/// - Interface strategies must only return globally routable addresses
/// - Must be cancellation-safe (the detector may drop the future on timeout)
#[async_trait]
pub trait IpSource: Send + Sync {
    /// Detect the current address for `family`
    ///
    /// # Returns
    ///
    /// - `Ok(IpAddr)`: An address of the requested family
    /// - `Err(Error)`: Timeout, non-2xx, malformed payload, no suitable address
    async fn detect(&self, family: IpFamily) -> Result<IpAddr, crate::Error>;

    /// Which detection method this strategy implements
    fn method(&self) -> DetectionMethod;

    /// Short name for logging
    fn name(&self) -> &str {
        match self.method() {
            DetectionMethod::Api => "http",
            DetectionMethod::Dns => "dns",
            DetectionMethod::Interface => "interface",
            DetectionMethod::Combined => "combined",
        }
    }

    /// Whether this strategy can detect `family` at all
    fn supports(&self, _family: IpFamily) -> bool {
        true
    }
}
