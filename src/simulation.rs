// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use service_link::{HostService, LocalDiscovery};

use crate::config::ScenarioStep;

/// Host service stand-in created by scenario binds.
#[derive(Debug)]
pub struct SimulatedService {
    name: String,
    version: String,
    version_code: i64,
}

impl SimulatedService {
    pub fn new(name: String, version: String, version_code: i64) -> Self {
        Self {
            name,
            version,
            version_code,
        }
    }
}

impl HostService for SimulatedService {
    fn framework_name(&self) -> &str {
        &self.name
    }

    fn framework_version(&self) -> &str {
        &self.version
    }

    fn framework_version_code(&self) -> i64 {
        self.version_code
    }
}

/// Play `steps` through `discovery`.
///
/// Returns every service created, in bind order, so `die` steps can refer
/// back to them by index.
pub async fn run_scenario(
    discovery: &LocalDiscovery<SimulatedService>,
    steps: &[ScenarioStep],
) -> Vec<Arc<SimulatedService>> {
    let mut services: Vec<Arc<SimulatedService>> = Vec::new();

    for step in steps {
        debug!("Scenario step: {:?}", step);

        match step {
            ScenarioStep::Bind {
                name,
                version,
                version_code,
            } => {
                let service = Arc::new(SimulatedService::new(name.clone(), version.clone(), *version_code));
                services.push(Arc::clone(&service));
                discovery.bind(service);
            }
            ScenarioStep::Die { service } => match services.get(*service) {
                Some(service) => discovery.report_died(Arc::clone(service)),
                None => warn!("Skipping death of unknown service #{}", service),
            },
            ScenarioStep::Pause { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
        }
    }

    services
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_link::{ConnectionState, ManagerConfig, ServiceManager};

    fn bind(version: &str) -> ScenarioStep {
        ScenarioStep::Bind {
            name: "LSPosed".to_string(),
            version: version.to_string(),
            version_code: 7024,
        }
    }

    #[tokio::test]
    async fn test_scenario_drives_manager() {
        let discovery = LocalDiscovery::new();
        let manager = ServiceManager::<SimulatedService>::new(ManagerConfig::default());
        manager.init(&discovery).unwrap();

        let services = run_scenario(
            &discovery,
            &[bind("1.0"), ScenarioStep::Die { service: 0 }],
        )
        .await;
        assert_eq!(services.len(), 1);
        assert!(matches!(*manager.connection_state(), ConnectionState::Disconnected));

        let services = run_scenario(&discovery, &[bind("1.1")]).await;
        assert!(manager.connection_state().is_bound_to(&services[0]));
        assert_eq!(manager.service().unwrap().framework_version_code(), 7024);
    }

    #[tokio::test]
    async fn test_stale_death_step_keeps_newer_bind() {
        let discovery = LocalDiscovery::new();
        let manager = ServiceManager::<SimulatedService>::new(ManagerConfig::default());
        manager.init(&discovery).unwrap();

        let services = run_scenario(
            &discovery,
            &[bind("1.0"), bind("1.1"), ScenarioStep::Die { service: 0 }],
        )
        .await;

        assert!(manager.connection_state().is_bound_to(&services[1]));
    }

    #[tokio::test]
    async fn test_unknown_service_is_skipped() {
        let discovery = LocalDiscovery::new();
        let manager = ServiceManager::<SimulatedService>::new(ManagerConfig::default());
        manager.init(&discovery).unwrap();

        let services = run_scenario(&discovery, &[ScenarioStep::Die { service: 3 }]).await;

        assert!(services.is_empty());
        assert!(matches!(*manager.connection_state(), ConnectionState::Connecting));
    }
}
