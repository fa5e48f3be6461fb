//! Content planning via a chat-completion service
//!
//! Two calls per pipeline run: one structured-JSON analysis of the
//! transcript (theme, category, tone, ranked insertion candidates) and one
//! short ad-copy generation anchored on the chosen candidate's context.
//! Responses are treated as untrusted: every field is validated before it
//! enters the internal data model, and candidates outside the allowed time
//! band are filtered out while preserving the model's ranking order.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ads::AdEntry;
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::transcribe::TranscriptionSegment;

/// One ranked candidate insertion time
#[derive(Debug, Clone, Deserialize)]
pub struct InsertionCandidate {
    /// Insertion time in seconds
    pub time: f64,
    /// 1 = best
    pub priority: u32,
    pub reason: String,
    pub context_before: String,
    pub context_after: String,
    pub transition_hint: String,
}

/// Validated analysis of the host video's content
#[derive(Debug, Clone, Deserialize)]
pub struct ContentAnalysis {
    pub theme: String,
    pub category: String,
    pub tone: String,
    pub target_audience: String,
    pub key_points: Vec<String>,
    pub insertion_points: Vec<InsertionCandidate>,
}

/// Inputs to ad-copy generation
pub struct AdCopyRequest<'a> {
    pub theme: &'a str,
    pub category: &'a str,
    pub tone: &'a str,
    pub context_before: &'a str,
    pub context_after: &'a str,
    pub transition_hint: &'a str,
    pub language: &'a str,
    pub ad: &'a AdEntry,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    r#type: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Chat-completion client for planning and copywriting
pub struct ChatPlanner {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    copy_min_chars: usize,
    copy_max_chars: usize,
}

impl ChatPlanner {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key: config.openai_api_key.clone(),
            model: config.openai_model.clone(),
            copy_min_chars: config.ad_copy_min_chars,
            copy_max_chars: config.ad_copy_max_chars,
        })
    }

    async fn chat(&self, request: &ChatRequest<'_>) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?
            .error_for_status()?;

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PipelineError::PlanMalformed("empty choices".into()))
    }

    /// Analyze the transcript and propose ranked insertion candidates.
    pub async fn analyze_content(
        &self,
        segments: &[TranscriptionSegment],
        duration: f64,
        avoid_start: f64,
        avoid_end: f64,
        num_candidates: usize,
    ) -> Result<ContentAnalysis> {
        info!("requesting content analysis ({num_candidates} candidates)");

        let system = "You are a professional short-video content analyst who recommends \
                      natural ad-insertion moments. Analyze the theme, category, key points, \
                      tone and target audience, then pick insertion times at natural topic \
                      transitions that preserve the flow of the content. \
                      Respond with JSON only.";

        let user = format!(
            "Analyze this transcript.\n\n\
             Video duration: {duration:.1}s\n\
             Do not place insertions in the first {avoid_start:.0}s or the last {avoid_end:.0}s.\n\n\
             Transcript:\n{transcript}\n\n---\n\n\
             Return JSON with exactly these fields:\n\
             {{\n\
               \"theme\": \"one-sentence theme\",\n\
               \"category\": \"content category (tech, education, lifestyle, ...)\",\n\
               \"key_points\": [\"...\"],\n\
               \"tone\": \"tone (formal, casual, humorous, ...)\",\n\
               \"target_audience\": \"...\",\n\
               \"insertion_points\": [\n\
                 {{\"time\": seconds, \"priority\": 1, \"reason\": \"...\",\n\
                  \"context_before\": \"2-3 sentences before the point\",\n\
                  \"context_after\": \"1-2 sentences after the point\",\n\
                  \"transition_hint\": \"how to transition into an ad\"}}\n\
               ]\n\
             }}\n\
             Provide {num_candidates} insertion_points ordered by priority (1 = best).",
            transcript = format_segments(segments),
        );

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.7,
            response_format: Some(ResponseFormat {
                r#type: "json_object",
            }),
        };

        let content = self.chat(&request).await?;
        let analysis = parse_analysis(&content)?;
        let analysis = filter_candidates(analysis, duration, avoid_start, avoid_end)?;

        info!(
            "analysis: theme={:?}, category={:?}, {} viable candidates",
            analysis.theme,
            analysis.category,
            analysis.insertion_points.len()
        );
        Ok(analysis)
    }

    /// Generate one short ad line in the host video's language.
    ///
    /// Out-of-range lengths are recovered in place: too short substitutes
    /// the catalog template, too long truncates to the configured maximum.
    pub async fn generate_ad_copy(&self, req: &AdCopyRequest<'_>) -> Result<String> {
        let (length_hint, language_name) = language_length_hint(req.language);

        info!(
            "generating ad copy for {:?} in {language_name}",
            req.ad.product
        );

        let system = format!(
            "You are a creative ad copywriter who writes humorous, contextual soft \
             advertisements in {language_name}. Your lines blend into the surrounding \
             conversation, reference the video topic directly, and never sound salesy. \
             Return ONLY the ad line with no commentary."
        );

        let transition = if req.transition_hint.is_empty() {
            String::new()
        } else {
            format!("Suggested transition: {}\n", req.transition_hint)
        };

        let user = format!(
            "Video theme: {theme}\n\
             Category: {category}\n\
             Tone: {tone}\n\n\
             What was just said: \"{before}\"\n\
             What comes next: \"{after}\"\n\
             {transition}\n\
             Product: {product}\n\
             Key benefits: {benefits}\n\n\
             Write one ad line that flows from the \"just said\" context into the product, \
             keeps the video's tone, and reads naturally before the \"comes next\" text.\n\
             Length: {length_hint}. Language: {language_name} only.",
            theme = req.theme,
            category = req.category,
            tone = req.tone,
            before = req.context_before,
            after = req.context_after,
            product = req.ad.product,
            benefits = req.ad.selling_points_text(),
        );

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.9,
            response_format: None,
        };

        let copy = self.chat(&request).await?.trim().to_string();
        Ok(enforce_copy_length(
            copy,
            self.copy_min_chars,
            self.copy_max_chars,
            req.ad.template_for(req.category),
        ))
    }
}

/// Clamp generated copy into the configured character bounds.
///
/// Too short substitutes the catalog template when one exists; too long
/// truncates at the maximum. Both recoveries are logged.
fn enforce_copy_length(
    copy: String,
    min_chars: usize,
    max_chars: usize,
    template: Option<&str>,
) -> String {
    let chars = copy.chars().count();

    if chars < min_chars {
        if let Some(template) = template {
            warn!("ad copy too short ({chars} chars < {min_chars}), substituting catalog template");
            return template.to_string();
        }
        warn!("ad copy too short ({chars} chars) and no template available, keeping it");
        return copy;
    }

    if chars > max_chars {
        warn!("ad copy too long ({chars} chars > {max_chars}), truncating");
        return copy.chars().take(max_chars).collect();
    }

    copy
}

/// Render segments as `[start - end] text` lines for the prompt.
fn format_segments(segments: &[TranscriptionSegment]) -> String {
    segments
        .iter()
        .map(|seg| format!("[{:.1}s - {:.1}s] {}", seg.start, seg.end, seg.text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse the model's JSON into a [`ContentAnalysis`], rejecting anything
/// missing or malformed.
fn parse_analysis(content: &str) -> Result<ContentAnalysis> {
    let analysis: ContentAnalysis = serde_json::from_str(content)
        .map_err(|e| PipelineError::PlanMalformed(e.to_string()))?;

    if analysis.theme.trim().is_empty() || analysis.category.trim().is_empty() {
        return Err(PipelineError::PlanMalformed(
            "empty theme or category".into(),
        ));
    }
    if analysis.insertion_points.is_empty() {
        return Err(PipelineError::PlanMalformed("no insertion_points".into()));
    }
    if analysis.insertion_points.iter().any(|p| p.priority == 0) {
        return Err(PipelineError::PlanMalformed(
            "priority must be >= 1".into(),
        ));
    }

    Ok(analysis)
}

/// Drop candidates outside `[avoid_start, duration - avoid_end]`, keeping
/// the surviving candidates in their original order.
fn filter_candidates(
    mut analysis: ContentAnalysis,
    duration: f64,
    avoid_start: f64,
    avoid_end: f64,
) -> Result<ContentAnalysis> {
    let latest = duration - avoid_end;
    let before = analysis.insertion_points.len();
    analysis
        .insertion_points
        .retain(|p| p.time >= avoid_start && p.time <= latest);

    let dropped = before - analysis.insertion_points.len();
    if dropped > 0 {
        debug!("filtered {dropped} candidates outside [{avoid_start:.0}s, {latest:.0}s]");
    }

    if analysis.insertion_points.is_empty() {
        return Err(PipelineError::NoViableCandidates);
    }
    Ok(analysis)
}

/// Map a detected language tag to (length requirement, language name).
fn language_length_hint(language: &str) -> (&'static str, &'static str) {
    if language.starts_with("zh") || language.starts_with("cn") {
        ("15-30 characters", "Chinese")
    } else if language.starts_with("en") {
        ("5-15 words", "English")
    } else if language.starts_with("ja") {
        ("15-30 characters", "Japanese")
    } else if language.starts_with("ko") {
        ("15-30 characters", "Korean")
    } else {
        ("one short sentence", "the video's language")
    }
}
