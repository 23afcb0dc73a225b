// crates/core/src/generator/transcript.rs
//! Built-in generator that renders a plain-text episode script.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{GenerationError, GenerationRequest, Generator};

const SUMMARY_CHARS: usize = 100;

/// Writes `episode.txt` from the `topic`, `title` and `summary` params.
pub struct TranscriptGenerator {
    show_title: String,
}

impl TranscriptGenerator {
    pub fn new(show_title: impl Into<String>) -> Self {
        Self {
            show_title: show_title.into(),
        }
    }

    fn render(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let param = |key: &str| request.params.get(key).and_then(|v| v.as_str()).map(str::trim);

        let topic = param("topic")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GenerationError::new("missing string parameter 'topic'"))?;
        let title = param("title").filter(|t| !t.is_empty()).unwrap_or(topic);
        let summary: String = param("summary")
            .unwrap_or("No summary available")
            .chars()
            .take(SUMMARY_CHARS)
            .collect();

        let show = &self.show_title;
        let id = &request.job_id;
        Ok(format!(
            "Welcome to {show}. Episode {id}.\n\
             Today we'll be discussing {topic}.\n\n\
             Host: Let's talk about {title}. What's your take on this story?\n\n\
             Guest: I was reading about {title}. The article mentions {summary}...\n\n\
             Host: What implications do you think this has for the future?\n\n\
             Thanks for listening to this episode of {show}.\n"
        ))
    }
}

#[async_trait]
impl Generator for TranscriptGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<PathBuf, GenerationError> {
        let script = self.render(&request)?;
        let path = request.scratch_dir.join("episode.txt");
        tokio::fs::write(&path, script)
            .await
            .map_err(|e| GenerationError::new(format!("write {}: {e}", path.display())))?;
        Ok(path)
    }

    fn name(&self) -> &str {
        "transcript"
    }
}
