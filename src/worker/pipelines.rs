//! Typed task pipelines.
//!
//! One pipeline per worker task type. Pipelines raise [`PipelineFault`]s;
//! they never decide retries themselves, and every write they make is an
//! upsert so a redelivered task converges on the same persisted results.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::adapters::AdapterSet;
use crate::error::PipelineFault;
use crate::jobs::model::TaskType;
use crate::worker::context::PipelineContext;

/// A runnable pipeline for one task type.
#[async_trait]
pub trait TaskPipeline: Send + Sync {
    fn task_type(&self) -> TaskType;

    /// Named steps, in order. Progress is advanced once per step.
    fn step_names(&self) -> &'static [&'static str];

    /// Run the pipeline to a final output document.
    async fn execute(&self, cx: &mut PipelineContext) -> Result<Value, PipelineFault>;
}

/// Build the pipeline for a worker task type.
pub fn pipeline_for(task_type: TaskType, adapters: AdapterSet) -> Arc<dyn TaskPipeline> {
    match task_type {
        TaskType::LeadGeneration => Arc::new(LeadGenerationPipeline { adapters }),
        TaskType::ProfileResearch => Arc::new(ProfileResearchPipeline { adapters }),
        TaskType::MessageCampaign => Arc::new(MessageCampaignPipeline { adapters }),
        TaskType::InboxMonitoring => Arc::new(InboxMonitoringPipeline { adapters }),
        TaskType::GeneralQuery => unreachable!("general_query has no worker pool"),
    }
}

fn required_array<'a>(params: &'a Value, field: &str) -> Result<&'a Vec<Value>, PipelineFault> {
    params
        .get(field)
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| PipelineFault::Validation(format!("missing or empty field: {field}")))
}

fn as_array(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

// ── Lead generation ─────────────────────────────────────────────────

/// search → enrich → score. Finds candidate companies matching the search
/// parameters, enriches the strongest candidates with organization research,
/// and persists a scored shortlist.
struct LeadGenerationPipeline {
    adapters: AdapterSet,
}

/// Candidates enriched per run; the rest are kept unscored.
const ENRICH_LIMIT: usize = 10;

#[async_trait]
impl TaskPipeline for LeadGenerationPipeline {
    fn task_type(&self) -> TaskType {
        TaskType::LeadGeneration
    }

    fn step_names(&self) -> &'static [&'static str] {
        &["search", "enrich", "score"]
    }

    async fn execute(&self, cx: &mut PipelineContext) -> Result<Value, PipelineFault> {
        let locations = required_array(&cx.params, "locations")?.clone();
        let businesses = required_array(&cx.params, "businesses")?.clone();
        let titles = required_array(&cx.params, "jobTitles")?.clone();

        let query = json!({
            "locations": locations,
            "businesses": businesses,
            "jobTitles": titles,
        });
        let found = cx
            .external("lead_search", self.adapters.lead_search.search(&query))
            .await?;
        let candidates = as_array(found.get("results").unwrap_or(&found));
        cx.step_done("search").await?;

        let mut enriched = Vec::with_capacity(candidates.len());
        for candidate in candidates.iter().take(ENRICH_LIMIT) {
            let organization = cx
                .external(
                    "organization_research",
                    self.adapters.organization.research(candidate),
                )
                .await?;
            enriched.push(json!({
                "candidate": candidate,
                "organization": organization,
            }));
        }
        cx.step_done("enrich").await?;

        let mut leads: Vec<Value> = enriched
            .iter()
            .map(|lead| {
                let score = score_lead(lead, &titles);
                json!({
                    "candidate": lead["candidate"],
                    "organization": lead["organization"],
                    "score": score,
                })
            })
            .collect();
        leads.sort_by(|a, b| {
            let sa = a["score"].as_f64().unwrap_or(0.0);
            let sb = b["score"].as_f64().unwrap_or(0.0);
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        });

        let artifact = json!({
            "query": query,
            "leads": leads,
            "total_found": candidates.len(),
        });
        cx.persist("leads", &artifact).await?;
        cx.step_done("score").await?;

        Ok(json!({
            "summary": format!("{} leads found, {} enriched", candidates.len(), leads.len()),
            "lead_count": candidates.len(),
            "enriched_count": leads.len(),
        }))
    }
}

/// Deterministic relevance score: base presence of enrichment data plus a
/// bonus when the candidate's title matches a requested one.
fn score_lead(lead: &Value, titles: &[Value]) -> f64 {
    let mut score = 0.2;
    if lead["organization"].as_object().is_some_and(|o| !o.is_empty()) {
        score += 0.4;
    }
    if let Some(title) = lead["candidate"]["title"].as_str() {
        let title = title.to_lowercase();
        if titles
            .iter()
            .filter_map(Value::as_str)
            .any(|wanted| title.contains(&wanted.to_lowercase()))
        {
            score += 0.4;
        }
    }
    score
}

// ── Profile research ────────────────────────────────────────────────

/// fetch_profile → research_organization → reputation → synthesize. Builds a
/// dossier on one person and their organization.
struct ProfileResearchPipeline {
    adapters: AdapterSet,
}

#[async_trait]
impl TaskPipeline for ProfileResearchPipeline {
    fn task_type(&self) -> TaskType {
        TaskType::ProfileResearch
    }

    fn step_names(&self) -> &'static [&'static str] {
        &["fetch_profile", "research_organization", "reputation", "synthesize"]
    }

    async fn execute(&self, cx: &mut PipelineContext) -> Result<Value, PipelineFault> {
        let reference = cx
            .params
            .get("profile")
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| PipelineFault::Validation("missing field: profile".into()))?;

        let profile = cx
            .external("profile_fetch", self.adapters.profile.fetch_profile(&reference))
            .await?;
        cx.step_done("fetch_profile").await?;

        let organization_ref = profile
            .get("organization")
            .filter(|v| !v.is_null())
            .cloned()
            .unwrap_or_else(|| reference.clone());
        let organization = cx
            .external(
                "organization_research",
                self.adapters.organization.research(&organization_ref),
            )
            .await?;
        cx.step_done("research_organization").await?;

        let reputation = cx
            .external("reputation_lookup", self.adapters.reputation.lookup(&profile))
            .await?;
        cx.step_done("reputation").await?;

        let subject = profile
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown subject")
            .to_string();
        let dossier = json!({
            "subject": subject,
            "profile": profile,
            "organization": organization,
            "reputation": reputation,
        });
        cx.persist("dossier", &dossier).await?;
        cx.step_done("synthesize").await?;

        Ok(json!({
            "summary": format!("dossier compiled for {subject}"),
            "subject": subject,
        }))
    }
}

// ── Message campaign ────────────────────────────────────────────────

/// render → deliver → report. Renders the template per recipient and
/// delivers each message once; per-recipient delivery receipts are keyed so
/// a redelivered task skips recipients already handled.
struct MessageCampaignPipeline {
    adapters: AdapterSet,
}

#[async_trait]
impl TaskPipeline for MessageCampaignPipeline {
    fn task_type(&self) -> TaskType {
        TaskType::MessageCampaign
    }

    fn step_names(&self) -> &'static [&'static str] {
        &["render", "deliver", "report"]
    }

    async fn execute(&self, cx: &mut PipelineContext) -> Result<Value, PipelineFault> {
        let recipients = required_array(&cx.params, "recipients")?.clone();
        // A pre-rendered `message` stands in for a `template`; rendering a
        // placeholder-free body is a no-op.
        let template = cx
            .params
            .get("template")
            .or_else(|| cx.params.get("message"))
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| PipelineFault::Validation("missing field: template or message".into()))?
            .to_string();

        let rendered: Vec<String> = recipients
            .iter()
            .map(|r| render_template(&template, r))
            .collect();
        cx.step_done("render").await?;

        let mut delivered = 0usize;
        let mut skipped = 0usize;
        for (idx, (recipient, message)) in recipients.iter().zip(&rendered).enumerate() {
            let receipt_kind = format!("delivery:{idx}");
            if cx.existing_artifact(&receipt_kind).await?.is_some() {
                skipped += 1;
                continue;
            }
            let receipt = cx
                .external(
                    "message_delivery",
                    self.adapters.delivery.deliver(recipient, message),
                )
                .await?;
            cx.persist(&receipt_kind, &receipt).await?;
            delivered += 1;
        }
        cx.step_done("deliver").await?;

        let report = json!({
            "recipients": recipients.len(),
            "delivered": delivered,
            "already_delivered": skipped,
        });
        cx.persist("campaign", &report).await?;
        cx.step_done("report").await?;

        Ok(json!({
            "summary": format!("{} of {} messages delivered", delivered + skipped, recipients.len()),
            "delivered": delivered + skipped,
        }))
    }
}

/// Substitute `{{field}}` placeholders with string fields of the recipient.
/// Unknown placeholders are left in place.
fn render_template(template: &str, recipient: &Value) -> String {
    let mut out = template.to_string();
    if let Some(fields) = recipient.as_object() {
        for (key, value) in fields {
            if let Some(text) = value.as_str() {
                out = out.replace(&format!("{{{{{key}}}}}"), text);
            }
        }
    }
    out
}

// ── Inbox monitoring ────────────────────────────────────────────────

/// fetch → triage. Pulls unread items from the monitored mailbox and
/// partitions replies from the rest.
struct InboxMonitoringPipeline {
    adapters: AdapterSet,
}

#[async_trait]
impl TaskPipeline for InboxMonitoringPipeline {
    fn task_type(&self) -> TaskType {
        TaskType::InboxMonitoring
    }

    fn step_names(&self) -> &'static [&'static str] {
        &["fetch", "triage"]
    }

    async fn execute(&self, cx: &mut PipelineContext) -> Result<Value, PipelineFault> {
        let mailbox = cx
            .params
            .get("mailbox")
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| PipelineFault::Validation("missing field: mailbox".into()))?;

        let fetched = cx
            .external("inbox_fetch", self.adapters.inbox.fetch_unread(&mailbox))
            .await?;
        let items = as_array(fetched.get("items").unwrap_or(&fetched));
        cx.step_done("fetch").await?;

        let (replies, other): (Vec<Value>, Vec<Value>) = items
            .into_iter()
            .partition(|item| !item["in_reply_to"].is_null());

        let artifact = json!({
            "mailbox": mailbox,
            "replies": replies,
            "other": other,
        });
        cx.persist("inbox", &artifact).await?;
        cx.step_done("triage").await?;

        Ok(json!({
            "summary": format!(
                "{} unread items, {} replies",
                replies.len() + other.len(),
                replies.len()
            ),
            "unread": replies.len() + other.len(),
            "replies": replies.len(),
        }))
    }
}
