//! HTTP client for the remote plan service
//!
//! Routes, relative to the configured base URL:
//! - `POST /plan` create
//! - `GET /plan/{id}` fetch (polling)
//! - `GET /plan/{id}?forceRefresh=true` refresh
//! - `PATCH /plan/{id}` submit step proofs

use super::service::PlanService;
use super::types::{Plan, PlanRequest, PlanStatus, PlanStep, PlanStepStatus, StepProofSubmission};
use crate::config::PlanServiceConfig;
use crate::error::{EngineError, EngineResult};
use crate::steps::{
    parse_erc20_approve_calldata, ApprovalStep, OrderSignatureStep, Permit2Step, Step, SwapStep,
    Token, TxRequest, WrapStep,
};

use async_trait::async_trait;
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, U256};
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanResponse {
    plan_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    steps: Vec<WireStep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStep {
    step_index: usize,
    #[serde(rename = "type")]
    step_type: String,
    #[serde(default)]
    status: Option<String>,
    chain_id: u64,
    #[serde(default)]
    expected_duration_ms: Option<u64>,
    #[serde(default)]
    tx_request: Option<TxRequest>,
    #[serde(default)]
    token: Option<Token>,
    #[serde(default)]
    spender: Option<Address>,
    #[serde(default)]
    amount: Option<U256>,
    #[serde(default)]
    typed_data: Option<TypedData>,
    #[serde(default)]
    deadline: Option<u64>,
    #[serde(default)]
    quote_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct UpdatePlanBody<'a> {
    steps: &'a [StepProofSubmission],
}

fn plan_status(raw: Option<&str>) -> PlanStatus {
    match raw {
        Some("COMPLETE") | Some("COMPLETED") => PlanStatus::Complete,
        Some("FAILED") | Some("ERROR") => PlanStatus::Failed,
        _ => PlanStatus::Active,
    }
}

fn step_status(raw: Option<&str>) -> PlanStepStatus {
    match raw {
        Some("COMPLETE") | Some("COMPLETED") => PlanStepStatus::Complete,
        _ => PlanStepStatus::Pending,
    }
}

impl PlanResponse {
    fn into_plan(self) -> EngineResult<Plan> {
        let mut steps = self
            .steps
            .into_iter()
            .map(WireStep::into_plan_step)
            .collect::<EngineResult<Vec<_>>>()?;
        steps.sort_by_key(|s| s.step_index);

        Ok(Plan {
            plan_id: self.plan_id,
            status: plan_status(self.status.as_deref()),
            steps,
        })
    }
}

impl WireStep {
    fn malformed(&self, reason: &str) -> EngineError {
        EngineError::MalformedPlan {
            step_index: self.step_index,
            reason: format!("{} {}", self.step_type, reason),
        }
    }

    /// Transaction request with the step's chain filled in when the service omits it
    fn require_tx(&mut self) -> EngineResult<TxRequest> {
        let mut tx = self
            .tx_request
            .take()
            .ok_or_else(|| self.malformed("is missing txRequest"))?;
        if tx.chain_id.is_none() {
            tx.chain_id = Some(self.chain_id.into());
        }
        Ok(tx)
    }

    fn require_typed_data(&mut self) -> EngineResult<TypedData> {
        self.typed_data
            .take()
            .ok_or_else(|| self.malformed("is missing typedData"))
    }

    fn allowance(&mut self, revocation: bool) -> EngineResult<ApprovalStep> {
        let tx_request = self.require_tx()?;
        let data = tx_request.data.clone().unwrap_or_default();
        let call = parse_erc20_approve_calldata(&data);

        let spender = self
            .spender
            .or(call.as_ref().map(|c| c.spender))
            .ok_or_else(|| self.malformed("has no decodable spender"))?;

        let amount = if revocation {
            U256::zero()
        } else {
            self.amount
                .or(call.as_ref().map(|c| c.amount))
                .ok_or_else(|| self.malformed("has no decodable amount"))?
        };

        let token = match self.token.take() {
            Some(token) => token,
            None => {
                let address = tx_request
                    .to
                    .as_ref()
                    .and_then(|to| to.as_address().copied())
                    .ok_or_else(|| self.malformed("has no token"))?;
                Token {
                    chain_id: self.chain_id,
                    address,
                    symbol: None,
                    decimals: 18,
                }
            }
        };

        Ok(ApprovalStep {
            tx_request,
            token,
            spender,
            amount,
        })
    }

    fn into_plan_step(mut self) -> EngineResult<PlanStep> {
        let step = match self.step_type.as_str() {
            "TOKEN_REVOCATION_TRANSACTION" => Step::TokenRevocation(self.allowance(true)?),
            "TOKEN_APPROVAL_TRANSACTION" => Step::TokenApproval(self.allowance(false)?),
            "PERMIT2_SIGNATURE" => {
                let typed_data = self.require_typed_data()?;
                let token = self
                    .token
                    .take()
                    .ok_or_else(|| self.malformed("is missing token"))?;
                Step::Permit2Signature(Permit2Step { typed_data, token })
            }
            "SWAP_TRANSACTION" => {
                let tx_request = if self.tx_request.is_some() {
                    Some(self.require_tx()?)
                } else {
                    None
                };
                Step::SwapTransaction(SwapStep { tx_request })
            }
            "WRAP_TRANSACTION" => {
                let tx_request = self.require_tx()?;
                let amount = self.amount.or(tx_request.value).unwrap_or_default();
                let native_token = self
                    .token
                    .take()
                    .unwrap_or_else(|| Token::native(self.chain_id));
                Step::WrapTransaction(WrapStep {
                    tx_request,
                    native_token,
                    amount,
                })
            }
            "OFFCHAIN_ORDER_SIGNATURE" => Step::OffchainOrderSignature(OrderSignatureStep {
                typed_data: self.require_typed_data()?,
                deadline: self.deadline,
                quote_id: self.quote_id.take(),
            }),
            other => return Err(EngineError::UnexpectedStepType(other.to_string())),
        };

        Ok(PlanStep {
            step_index: self.step_index,
            status: step_status(self.status.as_deref()),
            chain_id: self.chain_id,
            step,
            expected_duration_ms: self.expected_duration_ms,
        })
    }
}

/// `PlanService` over HTTP with camelCase JSON bodies
#[derive(Debug, Clone)]
pub struct HttpPlanService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPlanService {
    pub fn new(config: &PlanServiceConfig) -> EngineResult<Self> {
        if config.base_url.is_empty() {
            return Err(EngineError::Config(
                "plan_service.base_url is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn plan_url(&self, plan_id: Option<&str>) -> String {
        match plan_id {
            Some(id) => format!("{}/plan/{}", self.base_url, id),
            None => format!("{}/plan", self.base_url),
        }
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn send(&self, operation: &str, builder: RequestBuilder) -> EngineResult<Plan> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            warn!(operation, status = status.as_u16(), "Plan service returned an error");
            return Err(EngineError::PlanService {
                operation: operation.to_string(),
                status: Some(status.as_u16()),
                message: text,
            });
        }

        let body: PlanResponse = serde_json::from_str(&text)?;
        let plan = body.into_plan()?;
        debug!(
            operation,
            plan_id = %plan.plan_id,
            steps = plan.steps.len(),
            status = ?plan.status,
            "Plan service responded"
        );
        Ok(plan)
    }
}

#[async_trait]
impl PlanService for HttpPlanService {
    async fn create_plan(&self, request: &PlanRequest) -> EngineResult<Plan> {
        let builder = self
            .request(Method::POST, self.plan_url(None))
            .json(request);
        self.send("create_plan", builder).await
    }

    async fn refresh_plan(&self, plan_id: &str) -> EngineResult<Plan> {
        let builder = self
            .request(Method::GET, self.plan_url(Some(plan_id)))
            .query(&[("forceRefresh", "true")]);
        self.send("refresh_plan", builder).await
    }

    async fn update_plan(
        &self,
        plan_id: &str,
        proofs: &[StepProofSubmission],
    ) -> EngineResult<Plan> {
        let builder = self
            .request(Method::PATCH, self.plan_url(Some(plan_id)))
            .json(&UpdatePlanBody { steps: proofs });
        self.send("update_plan", builder).await
    }

    async fn poll_plan(&self, plan_id: &str, target_step_index: usize) -> EngineResult<Plan> {
        debug!(plan_id, target_step_index, "Polling plan");
        let builder = self.request(Method::GET, self.plan_url(Some(plan_id)));
        self.send("poll_plan", builder).await
    }
}
