use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ServiceResult;
use crate::types::Idea;

static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}_\s]").unwrap());

fn bullet_section(out: &mut String, heading: &str, items: &[String]) {
    let _ = writeln!(out, "### {heading}");
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
    out.push('\n');
}

/// Renders an idea as a Markdown document. The plan and code sections only
/// appear once the idea has them.
pub fn export_markdown(idea: &Idea) -> String {
    let founding = idea.founding();
    let mut out = String::new();
    let _ = write!(
        out,
        "# {}\n\n## Description\n{}\n\n## Target Audience\n{}\n\n## Monetization Strategy\n{}\n\n",
        founding.name, founding.description, founding.target_audience, founding.monetization
    );

    if let Some(expansion) = idea.expansion() {
        out.push_str("## Project Plan\n\n");
        bullet_section(&mut out, "Core Features (MVP)", &expansion.mvp_features);
        bullet_section(&mut out, "Tech Stack", &expansion.tech_stack);
        bullet_section(&mut out, "Potential Challenges", &expansion.potential_challenges);
    }

    if let Some(files) = idea.code_scaffold().filter(|files| !files.is_empty()) {
        out.push_str("## Code Scaffold\n\n");
        for file in files {
            let _ = write!(out, "### `{}`\n```python\n{}\n```\n\n", file.file_name, file.code);
        }
    }

    out
}

/// `My Agent!` becomes `My_Agent.md`.
pub fn export_file_name(name: &str) -> String {
    let cleaned = DISALLOWED.replace_all(name, "");
    format!("{}.md", cleaned.replace(' ', "_"))
}

/// Writes the export into `directory` and returns the file's path.
pub fn write_export(idea: &Idea, directory: &Path) -> ServiceResult<PathBuf> {
    fs::create_dir_all(directory)?;
    let path = directory.join(export_file_name(idea.name()));
    fs::write(&path, export_markdown(idea))?;
    Ok(path)
}
