use crate::agent::result::{ArtifactRef, Reference, RunResult, Segment, TurnStatus};
use crate::traits::{AnnotationKind, ContentPart, Message, Role, Run, RunStatus};
use std::collections::HashMap;
use std::fmt::Write;

pub struct ResponseExtractor;

impl ResponseExtractor {
    /// Builds the result of a finished run from the conversation, whose
    /// `messages` are ordered most recent first.
    pub fn extract(run: &Run, messages: &[Message]) -> RunResult {
        let status = match run.status {
            RunStatus::Incomplete => TurnStatus::Incomplete,
            _ => TurnStatus::Completed,
        };
        let mut result = RunResult::empty(Some(run.id.clone()), status);

        let turn: Vec<&Message> = messages
            .iter()
            .take_while(|m| m.role == Role::Assistant)
            .collect();

        let mut citations = Citations::default();
        for message in turn.into_iter().rev() {
            for part in &message.content {
                match part {
                    ContentPart::Text { value, annotations } => {
                        let mut text = value.clone();
                        let mut artifacts = vec![];

                        for annotation in annotations {
                            match &annotation.kind {
                                AnnotationKind::Citation { file_id, quote } => {
                                    let index = citations.index_for(file_id, quote.as_deref());
                                    text = replace_marker(&text, &annotation.marker, &format!("[{index}]"));
                                }
                                AnnotationKind::FilePath { file_id } => {
                                    text = replace_marker(&text, &annotation.marker, "");
                                    artifacts.push(file_id.clone());
                                }
                            }
                        }

                        let text = text.trim().to_string();
                        if !text.is_empty() {
                            result.segments.push(Segment::Text { text });
                        }
                        for file_id in artifacts {
                            push_artifact(&mut result.segments, file_id);
                        }
                    }
                    ContentPart::Image { file_id } => {
                        push_artifact(&mut result.segments, file_id.clone());
                    }
                }
            }
        }

        result.references = citations.references;
        result
    }

    pub fn format_references(result: &RunResult) -> String {
        let mut out = String::new();
        for reference in &result.references {
            let _ = match &reference.quote {
                Some(quote) => writeln!(out, "[{}] {}: {}", reference.index, reference.file_id, quote),
                None => writeln!(out, "[{}] {}", reference.index, reference.file_id),
            };
        }
        out
    }
}

#[derive(Default)]
struct Citations {
    by_file: HashMap<String, usize>,
    references: Vec<Reference>,
}

impl Citations {
    fn index_for(&mut self, file_id: &str, quote: Option<&str>) -> usize {
        if let Some(index) = self.by_file.get(file_id) {
            return *index;
        }
        let index = self.references.len() + 1;
        self.by_file.insert(file_id.to_string(), index);
        self.references.push(Reference {
            index,
            file_id: file_id.to_string(),
            quote: quote.map(str::to_string),
        });
        index
    }
}

fn replace_marker(text: &str, marker: &str, replacement: &str) -> String {
    if marker.is_empty() {
        return text.to_string();
    }
    text.replacen(marker, replacement, 1)
}

fn push_artifact(segments: &mut Vec<Segment>, file_id: String) {
    let seen = segments
        .iter()
        .any(|s| matches!(s, Segment::Artifact(a) if a.file_id == file_id));
    if !seen {
        segments.push(Segment::Artifact(ArtifactRef { file_id }));
    }
}
