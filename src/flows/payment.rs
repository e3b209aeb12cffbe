//! `/pago`: record a payment against a policy.

use super::{cancel_button, cancel_flat_flow, flat_flow_active, invariant, FlowArgs, FlowDeps, FlowHandler, FlowName, StartOutcome};
use crate::domain::policy::{normalize_policy_number, parse_payment};
use crate::error::{FlowResult, StoreError};
use crate::services::Reply;
use crate::state::{AwaitingFlow, ConversationId, Pending};
use async_trait::async_trait;
use tracing::info;

const DATA_PROMPT: &str = "💰 Envía el pago:\nmonto: 1500\nfecha: 15/03/2026";

pub struct PaymentFlow {
    deps: FlowDeps,
}

impl PaymentFlow {
    pub fn new(deps: FlowDeps) -> Self {
        Self { deps }
    }

    async fn prompt_data(&self, id: &ConversationId, number: &str) -> FlowResult<()> {
        self.deps
            .say(
                id,
                Reply::text(format!("Póliza {}.\n{}", number, DATA_PROMPT))
                    .row(vec![cancel_button(self.name())]),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FlowHandler for PaymentFlow {
    fn name(&self) -> FlowName {
        FlowName::AddPayment
    }

    fn is_active(&self, id: &ConversationId) -> bool {
        flat_flow_active(&self.deps.registry, self.name(), id)
    }

    async fn start(&self, id: &ConversationId, args: FlowArgs) -> FlowResult<StartOutcome> {
        if let Some(number) = args.policy_number.as_deref().and_then(normalize_policy_number) {
            self.deps
                .registry
                .awaiting(AwaitingFlow::PaymentData)
                .set(id, Pending::Policy(number.clone()));
            self.prompt_data(id, &number).await?;
            return Ok(StartOutcome::Started);
        }

        self.deps
            .registry
            .awaiting(AwaitingFlow::PaymentNumber)
            .set(id, Pending::Fresh);
        self.deps
            .say(
                id,
                Reply::text("💰 Escribe el número de póliza del pago:")
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
            AwaitingFlow::PaymentNumber => {
                let Some(number) = normalize_policy_number(text) else {
                    self.deps.say(id, "⚠️ Número de póliza inválido. Intenta de nuevo:").await?;
                    return Ok(());
                };
                if self.deps.policies.find_policy_by_number(&number).await?.is_none() {
                    self.deps
                        .say(id, format!("❌ No encontré la póliza {}. Escribe otro número:", number))
                        .await?;
                    return Ok(());
                }
                if self.deps.advance(
                    id,
                    AwaitingFlow::PaymentNumber,
                    AwaitingFlow::PaymentData,
                    Pending::Policy(number.clone()),
                ) {
                    self.prompt_data(id, &number).await?;
                }
                Ok(())
            }
            AwaitingFlow::PaymentData => {
                let number = pending
                    .policy()
                    .map(str::to_string)
                    .ok_or_else(|| invariant("payment data without a policy"))?;
                let payment = match parse_payment(text) {
                    Ok(payment) => payment,
                    Err(reason) => {
                        self.deps.say(id, format!("⚠️ {}", reason)).await?;
                        return Ok(());
                    }
                };
                if self.deps.registry.awaiting(AwaitingFlow::PaymentData).take(id).is_none() {
                    return Ok(());
                }

                let amount = payment.amount;
                let date = payment.date;
                match self.deps.policies.add_payment(&number, payment).await {
                    Ok(policy) => {
                        info!("Payment of {:.2} added to {} by {}", amount, number, id);
                        self.deps
                            .say(
                                id,
                                format!(
                                    "✅ Pago de ${:.2} del {} registrado en {} ({} pagos).",
                                    amount,
                                    date.format("%d/%m/%Y"),
                                    number,
                                    policy.payments.len()
                                ),
                            )
                            .await?;
                    }
                    Err(StoreError::NotFound(_)) => {
                        self.deps
                            .say(id, format!("❌ La póliza {} ya no está activa.", number))
                            .await?;
                    }
                    Err(e) => return Err(e.into()),
                }
                Ok(())
            }
            step => Err(invariant(format!("payment flow cannot handle {}", step))),
        }
    }
}
