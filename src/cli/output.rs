//! Colored output helpers for CLI
//!
//! Every command renders through [`Output`], so `--no-color` switches the
//! whole CLI to plain ASCII markers.

use owo_colors::OwoColorize;
use std::io::{self, Write};

use crate::rag::citations::Citation;

/// Characters of chunk text shown per search hit.
const SNIPPET_CHARS: usize = 160;

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    pub fn new() -> Self {
        Self { colored: true }
    }

    pub fn no_color() -> Self {
        Self { colored: false }
    }

    pub fn success(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "✓".green().bold(), message.green());
        } else {
            println!("  [OK] {}", message);
        }
    }

    pub fn info(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "•".blue(), message);
        } else {
            println!("  [INFO] {}", message);
        }
    }

    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("  [WARN] {}", message);
        }
    }

    /// Errors go to stderr.
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.bright_white().bold().underline());
        } else {
            println!("\n  === {} ===", title);
        }
    }

    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {}: {}", key.dimmed(), value.bright_white());
        } else {
            println!("    {}: {}", key, value);
        }
    }

    /// One ranked search hit.
    pub fn search_hit(&self, rank: usize, similarity: f32, document_id: &str, chunk_index: usize, text: &str) {
        let snippet = snippet(text);
        if self.colored {
            println!(
                "\n  {} {} {}",
                format!("#{}", rank).bright_cyan().bold(),
                format!("{:.3}", similarity).green(),
                format!("{} / chunk {}", document_id, chunk_index).dimmed()
            );
            println!("    {}", snippet);
        } else {
            println!(
                "\n  #{} {:.3} {} / chunk {}",
                rank, similarity, document_id, chunk_index
            );
            println!("    {}", snippet);
        }
    }

    pub fn answer(&self, text: &str) {
        println!();
        for line in text.lines() {
            println!("  {}", line);
        }
    }

    /// Print a streamed fragment without a newline.
    pub fn fragment(&self, text: &str) {
        print!("{}", text);
        io::stdout().flush().ok();
    }

    pub fn citation(&self, citation: &Citation) {
        let label = format!("[{}]", citation.source_id);
        let origin = format!(
            "{} ({:.3})",
            citation.document_id, citation.similarity
        );
        if self.colored {
            println!(
                "    {} {} {}",
                label.bright_cyan(),
                origin.dimmed(),
                snippet(&citation.chunk_text)
            );
        } else {
            println!("    {} {} {}", label, origin, snippet(&citation.chunk_text));
        }
    }

    /// Timing line, e.g. `embedding 12ms · search 3ms`.
    pub fn timing(&self, parts: &[(&str, u64)]) {
        let line = parts
            .iter()
            .map(|(label, ms)| format!("{} {}ms", label, ms))
            .collect::<Vec<_>>()
            .join(" · ");
        if self.colored {
            println!("\n  {}", line.dimmed());
        } else {
            println!("\n  {}", line);
        }
    }

    pub fn hint(&self, message: &str) {
        if self.colored {
            println!("\n  {}", message.dimmed().italic());
        } else {
            println!("\n  [TIP] {}", message);
        }
    }

    pub fn newline(&self) {
        println!();
    }
}

/// First line-normalized characters of `text`.
fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SNIPPET_CHARS {
        return flat;
    }
    let mut short: String = flat.chars().take(SNIPPET_CHARS).collect();
    short.push('…');
    short
}
