//! "Ocupar póliza": confirm the phone and capture the trip of a service.

use super::{cancel_button, cancel_flat_flow, flat_flow_active, invariant, FlowArgs, FlowDeps, FlowHandler, FlowName, StartOutcome};
use crate::bot::callbacks::CallbackAction;
use crate::domain::policy::{parse_coordinates, parse_phone, Coordinates};
use crate::error::FlowResult;
use crate::services::Reply;
use crate::state::{AwaitingFlow, ConversationId, Pending};
use async_trait::async_trait;
use tracing::info;

pub struct OccupyPolicyFlow {
    deps: FlowDeps,
}

fn route_summary(policy: &str, origin: &Coordinates, destination: &Coordinates) -> String {
    format!(
        "🚕 Ruta para la póliza {}\n\n📍 Origen: {}\n🏁 Destino: {}\n📏 Distancia aprox.: {:.1} km",
        policy,
        origin.maps_url(),
        destination.maps_url(),
        origin.distance_km(destination)
    )
}

impl OccupyPolicyFlow {
    pub fn new(deps: FlowDeps) -> Self {
        Self { deps }
    }

    async fn ask_origin(&self, id: &ConversationId) -> FlowResult<()> {
        self.deps
            .say(
                id,
                Reply::text("📍 Envía la ubicación de origen (o escribe lat, lon):")
                    .button("✍️ Escribir origen y destino", CallbackAction::OccupyAsText)
                    .row(vec![cancel_button(self.name())]),
            )
            .await?;
        Ok(())
    }

    /// Switch from locations to a typed "origen - destino" line.
    pub async fn use_text_route(&self, id: &ConversationId) -> FlowResult<bool> {
        let Some(pending) = self.deps.registry.awaiting(AwaitingFlow::Origin).get(id) else {
            return Ok(false);
        };
        if !self.deps.advance(id, AwaitingFlow::Origin, AwaitingFlow::OriginDestination, pending) {
            return Ok(false);
        }
        self.deps
            .say(
                id,
                Reply::text("✍️ Escribe el origen y el destino separados por un guion:\nCentro, CDMX - Satélite, Naucalpan")
                    .row(vec![cancel_button(self.name())]),
            )
            .await?;
        Ok(true)
    }

    async fn on_phone(&self, id: &ConversationId, policy: String, text: &str) -> FlowResult<()> {
        let phone = match parse_phone(text) {
            Ok(phone) => phone,
            Err(reason) => {
                self.deps.say(id, format!("⚠️ {}", reason)).await?;
                return Ok(());
            }
        };
        if !self.deps.registry.awaiting(AwaitingFlow::PhoneNumber).has(id) {
            return Ok(());
        }

        self.deps.policies.update_phone(&policy, &phone).await?;
        if self.deps.advance(
            id,
            AwaitingFlow::PhoneNumber,
            AwaitingFlow::Origin,
            Pending::Policy(policy),
        ) {
            self.deps.say(id, format!("✅ Teléfono {} guardado.", phone)).await?;
            self.ask_origin(id).await?;
        }
        Ok(())
    }

    async fn on_origin(&self, id: &ConversationId, policy: String, origin: Coordinates) -> FlowResult<()> {
        if self.deps.advance(
            id,
            AwaitingFlow::Origin,
            AwaitingFlow::Destination,
            Pending::Route { policy, origin },
        ) {
            self.deps
                .say(
                    id,
                    Reply::text("🏁 Ahora envía la ubicación de destino (o escribe lat, lon):")
                        .row(vec![cancel_button(self.name())]),
                )
                .await?;
        }
        Ok(())
    }

    async fn on_destination(
        &self,
        id: &ConversationId,
        policy: String,
        origin: Coordinates,
        destination: Coordinates,
    ) -> FlowResult<()> {
        if !self.deps.registry.awaiting(AwaitingFlow::Destination).delete(id) {
            return Ok(());
        }
        info!("Route captured for {} by {}", policy, id);
        self.deps
            .say(id, route_summary(&policy, &origin, &destination))
            .await?;
        Ok(())
    }

    async fn on_text_route(&self, id: &ConversationId, policy: String, text: &str) -> FlowResult<()> {
        let Some((origin, destination)) = text
            .split_once(" - ")
            .map(|(o, d)| (o.trim(), d.trim()))
            .filter(|(o, d)| !o.is_empty() && !d.is_empty())
        else {
            self.deps
                .say(id, "⚠️ Escribe origen y destino separados por \" - \".")
                .await?;
            return Ok(());
        };
        if !self.deps.registry.awaiting(AwaitingFlow::OriginDestination).delete(id) {
            return Ok(());
        }
        self.deps
            .say(
                id,
                format!(
                    "🚕 Ruta para la póliza {}\n\n📍 Origen: {}\n🏁 Destino: {}",
                    policy, origin, destination
                ),
            )
            .await?;
        Ok(())
    }

    async fn on_point(
        &self,
        id: &ConversationId,
        step: AwaitingFlow,
        pending: Pending,
        at: Coordinates,
    ) -> FlowResult<()> {
        match (step, pending) {
            (AwaitingFlow::Origin, Pending::Policy(policy)) => self.on_origin(id, policy, at).await,
            (AwaitingFlow::Destination, Pending::Route { policy, origin }) => {
                self.on_destination(id, policy, origin, at).await
            }
            (step, pending) => Err(invariant(format!(
                "occupy flow cannot place a point at {} with {:?}",
                step, pending
            ))),
        }
    }
}

#[async_trait]
impl FlowHandler for OccupyPolicyFlow {
    fn name(&self) -> FlowName {
        FlowName::OccupyPolicy
    }

    fn is_active(&self, id: &ConversationId) -> bool {
        flat_flow_active(&self.deps.registry, self.name(), id)
    }

    async fn start(&self, id: &ConversationId, args: FlowArgs) -> FlowResult<StartOutcome> {
        let Some(number) = self.deps.policy_for(id, &args) else {
            self.deps
                .say(id, "⚠️ Primero consulta una póliza con /get para poder ocuparla.")
                .await?;
            return Ok(StartOutcome::NotStarted);
        };
        let Some(policy) = self.deps.policies.find_policy_by_number(&number).await? else {
            self.deps
                .say(id, format!("❌ No encontré la póliza {}.", number))
                .await?;
            return Ok(StartOutcome::NotStarted);
        };

        self.deps
            .registry
            .awaiting(AwaitingFlow::PhoneNumber)
            .set(id, Pending::Policy(policy.number.clone()));
        let current = policy
            .phone
            .as_deref()
            .map(|phone| format!(" (actual: {})", phone))
            .unwrap_or_default();
        self.deps
            .say(
                id,
                Reply::text(format!(
                    "🚕 Ocupar póliza {}.\n📞 Escribe el teléfono de contacto a 10 dígitos{}:",
                    policy.number, current
                ))
                .row(vec![cancel_button(self.name())]),
            )
            .await?;
        Ok(StartOutcome::Started)
    }

    fn cancel(&self, id: &ConversationId) -> bool {
        cancel_flat_flow(&self.deps.registry, self.name(), id)
    }

    async fn on_text(
        &self,
        id: &ConversationId,
        step: AwaitingFlow,
        pending: Pending,
        text: &str,
    ) -> FlowResult<()> {
        match step {
            AwaitingFlow::PhoneNumber => {
                let policy = pending
                    .policy()
                    .map(str::to_string)
                    .ok_or_else(|| invariant("phone step without a policy"))?;
                self.on_phone(id, policy, text).await
            }
            AwaitingFlow::Origin | AwaitingFlow::Destination => match parse_coordinates(text) {
                Ok(at) => self.on_point(id, step, pending, at).await,
                Err(reason) => {
                    self.deps.say(id, format!("⚠️ {}", reason)).await?;
                    Ok(())
                }
            },
            AwaitingFlow::OriginDestination => {
                let policy = pending
                    .policy()
                    .map(str::to_string)
                    .ok_or_else(|| invariant("route step without a policy"))?;
                self.on_text_route(id, policy, text).await
            }
            step => Err(invariant(format!("occupy flow cannot handle {}", step))),
        }
    }

    async fn on_location(
        &self,
        id: &ConversationId,
        step: AwaitingFlow,
        pending: Pending,
        at: Coordinates,
    ) -> FlowResult<()> {
        self.on_point(id, step, pending, at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_summary_has_links_and_distance() {
        let origin = Coordinates { lat: 19.4326, lon: -99.1332 };
        let destination = Coordinates { lat: 19.5, lon: -99.2 };

        let summary = route_summary("P-1", &origin, &destination);

        assert!(summary.contains("P-1"));
        assert!(summary.contains("https://www.google.com/maps?q=19.432600,-99.133200"));
        assert!(summary.contains("km"));
    }
}
