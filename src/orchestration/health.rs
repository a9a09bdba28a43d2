//! Health check results.
//!
//! Health checks run elsewhere; their verdicts arrive here one at a time.
//! Failures during the grace period of a task that was never healthy are
//! ignored. Past `max_consecutive_failures` the instance is killed and
//! replaced.

use tracing::{debug, instrument, warn};

use crate::error::{FleetError, FleetResult};
use crate::events::{EventPayload, HealthStatusChanged};
use crate::leadership::LeadershipTerm;
use crate::models::ids::InstanceId;
use crate::models::instance::{HealthState, Instance};
use crate::orchestration::core::FleetOrchestrator;
use crate::state_machine::Condition;

impl FleetOrchestrator {
    /// Record one health check result for a running instance and return its
    /// resulting health.
    #[instrument(skip(self, term), fields(instance_id = %instance_id, alive = alive))]
    pub async fn report_health(
        &self,
        term: &LeadershipTerm,
        instance_id: &InstanceId,
        alive: bool,
    ) -> FleetResult<HealthState> {
        let Some(found) = self.repo.instance(instance_id).await? else {
            return Err(FleetError::not_found("Instance", instance_id));
        };
        let _guard = self.lock_app(&found.app_id).await;
        self.ensure_active(term)?;

        let Some(mut instance) = self.repo.instance(instance_id).await? else {
            return Err(FleetError::not_found("Instance", instance_id));
        };
        if instance.condition != Condition::Running {
            debug!(condition = %instance.condition, "Health result for non-running instance ignored");
            return Ok(instance.health);
        }
        let Some(check) = self
            .version_of(&instance)
            .await?
            .and_then(|app| app.health_checks.first().cloned())
        else {
            debug!("Health result for instance without health checks ignored");
            return Ok(instance.health);
        };

        let now = self.clock.now();
        let previous = instance.health;
        if alive {
            instance.health = HealthState::Healthy;
            instance.consecutive_health_failures = 0;
        } else {
            let in_grace = previous == HealthState::Unknown
                && instance
                    .started_at
                    .is_some_and(|started| now < started + check.grace_period());
            if in_grace {
                debug!("Health failure within grace period ignored");
                return Ok(previous);
            }
            instance.health = HealthState::Unhealthy;
            instance.consecutive_health_failures += 1;
        }

        self.ensure_active(term)?;
        self.repo.store_instance(&instance).await?;
        if instance.health != previous {
            self.publish(term, health_changed(&instance, alive))?;
        }

        let exhausted = !alive
            && check.max_consecutive_failures > 0
            && instance.consecutive_health_failures >= check.max_consecutive_failures;
        let health = instance.health;
        if exhausted {
            warn!(
                failures = instance.consecutive_health_failures,
                "💔 HEALTH: Consecutive failures exhausted, killing instance"
            );
            let app_id = instance.app_id.clone();
            self.kill_instance_locked(term, instance, "health check failures")
                .await?;
            self.settle_app(term, &app_id).await?;
        } else {
            self.settle_app(term, &instance.app_id).await?;
        }
        Ok(health)
    }
}

fn health_changed(instance: &Instance, alive: bool) -> EventPayload {
    EventPayload::HealthStatusChanged(HealthStatusChanged {
        app_id: instance.app_id.clone(),
        instance_id: instance.id.clone(),
        version: instance.run_spec_version,
        alive,
    })
}
