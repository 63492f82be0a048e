//! Lookup table of loaded Control Packages, keyed by package name.
//!
//! Grounded on `call-engine/src/registry.rs`'s `DashMap`-backed
//! lookup-by-name registry, generalized to packages, and on
//! `CfwStack::loadPackages`/`getPackage`/`getSupportedPackages` for the
//! `Supported:` header behavior (§4.5).

use std::sync::Arc;

use dashmap::DashMap;

use crate::package::ControlPackage;
use crate::{Error, Result};

#[derive(Default)]
pub struct PackageRegistry {
    packages: DashMap<String, Arc<dyn ControlPackage>>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self {
            packages: DashMap::new(),
        }
    }

    /// Register `package` under its own name. Fails if a package with the
    /// same name is already registered — packages are loaded once at
    /// startup, not hot-swapped.
    pub fn register(&self, package: Arc<dyn ControlPackage>) -> Result<()> {
        let name = package.name().to_string();
        if self.packages.contains_key(&name) {
            return Err(Error::PackageAlreadyRegistered(name));
        }
        self.packages.insert(name, package);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ControlPackage>> {
        self.packages
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::PackageNotFound(name.to_string()))
    }

    pub fn is_supported(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// The comma-separated `name/version` list advertised on SYNC
    /// responses and in the `Packages:` header.
    pub fn supported_list(&self) -> String {
        let mut entries: Vec<String> = self
            .packages
            .iter()
            .map(|entry| format!("{}/{}", entry.value().name(), entry.value().version()))
            .collect();
        entries.sort();
        entries.join(",")
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mediactrl_media::dtmf::DtmfDigit;
    use mediactrl_media::types::{AudioFrame, EndpointId};

    struct FakePackage {
        name: &'static str,
        version: &'static str,
    }

    #[async_trait]
    impl ControlPackage for FakePackage {
        fn name(&self) -> &str {
            self.name
        }
        fn version(&self) -> &str {
            self.version
        }
        fn description(&self) -> &str {
            "fake"
        }
        fn mime_type(&self) -> &str {
            "application/fake+xml"
        }
        async fn setup(
            &self,
            _endpoint: Arc<dyn crate::endpoint::EndpointAdapter>,
            _callback: Arc<dyn crate::package::PackageCallback>,
        ) -> Result<()> {
            Ok(())
        }
        async fn control(&self, _requester: &str, _tid: &str, _body: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn incoming_frame(
            &self,
            _connection: EndpointId,
            _sub_connection: Option<EndpointId>,
            _frame: AudioFrame,
        ) {
        }
        async fn incoming_dtmf(
            &self,
            _connection: EndpointId,
            _sub_connection: Option<EndpointId>,
            _digit: DtmfDigit,
        ) {
        }
        async fn frame_sent(
            &self,
            _connection: EndpointId,
            _sub_connection: Option<EndpointId>,
            _frame: &AudioFrame,
        ) {
        }
        async fn connection_closing(
            &self,
            _connection: EndpointId,
            _sub_connection: Option<EndpointId>,
        ) {
        }
    }

    #[test]
    fn registering_the_same_name_twice_fails() {
        let registry = PackageRegistry::new();
        registry
            .register(Arc::new(FakePackage {
                name: "msc-mixer",
                version: "1.0",
            }))
            .unwrap();
        let err = registry
            .register(Arc::new(FakePackage {
                name: "msc-mixer",
                version: "1.0",
            }))
            .unwrap_err();
        assert!(matches!(err, Error::PackageAlreadyRegistered(_)));
    }

    #[test]
    fn supported_list_is_sorted_name_slash_version() {
        let registry = PackageRegistry::new();
        registry
            .register(Arc::new(FakePackage {
                name: "msc-ivr",
                version: "1.0",
            }))
            .unwrap();
        registry
            .register(Arc::new(FakePackage {
                name: "msc-mixer",
                version: "1.0",
            }))
            .unwrap();
        assert_eq!(registry.supported_list(), "msc-ivr/1.0,msc-mixer/1.0");
    }

    #[test]
    fn unknown_package_lookup_fails() {
        let registry = PackageRegistry::new();
        assert!(matches!(
            registry.get("msc-mixer"),
            Err(Error::PackageNotFound(_))
        ));
    }
}
