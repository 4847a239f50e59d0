use crate::types::Idea;

pub const IDEAS_SYSTEM_INSTRUCTION: &str = "You are an AI strategy expert who specializes in inventing and designing profitable AI agents. Your task is to analyze the input and generate 4 innovative, commercially viable AI agent project ideas. Each idea must be unique and offer real value.";

pub const EXPANSION_SYSTEM_INSTRUCTION: &str = "You are a senior product manager and AI technology expert. Your task is to analyze a project idea and turn it into an initial business plan.";

pub const SCAFFOLD_SYSTEM_INSTRUCTION: &str = "You are an expert software engineer specializing in AI projects using Python. Your task is to generate a foundational Python project structure based on the provided project plan. Create a few essential files (e.g., main.py, agent.py, utils.py) with boilerplate code, function definitions based on the MVP features, and clear, helpful comments to guide the developer. The code should be simple, clean, and ready for development.";

/// First message sent on a new chat so the model opens the conversation.
pub const CHAT_OPENING_MESSAGE: &str =
    "Hello! Please introduce yourself and confirm the project we are going to discuss.";

pub fn ideas_prompt(user_input: &str) -> String {
    format!("Based on this input: \"{user_input}\", generate AI agent project ideas.")
}

pub fn image_prompt(image_prompt: &str) -> String {
    format!("A vibrant, abstract, conceptual art representing the idea of: {image_prompt}")
}

pub fn expansion_prompt(idea: &Idea) -> String {
    let founding = idea.founding();
    format!(
        "Analyze the following AI agent project idea:\n\
         - Name: \"{}\"\n\
         - Description: \"{}\"\n\n\
         Provide the following details:\n\
         1. The most important features for the first version (MVP).\n\
         2. The suggested tech stack.\n\
         3. The most significant potential challenges.",
        founding.name, founding.description
    )
}

fn bullets(items: &[String], indent: &str) -> String {
    items
        .iter()
        .map(|item| format!("{indent}- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `None` when the idea has not been expanded yet.
pub fn scaffold_prompt(idea: &Idea) -> Option<String> {
    let expansion = idea.expansion()?;
    let founding = idea.founding();
    Some(format!(
        "Based on the following AI Agent project plan, please generate the initial code scaffold.\n\n\
         - Project Name: \"{}\"\n\
         - Description: \"{}\"\n\
         - Core MVP Features:\n{}\n\
         - Suggested Tech Stack:\n{}\n\n\
         Generate the Python code for the necessary files.",
        founding.name,
        founding.description,
        bullets(&expansion.mvp_features, "  "),
        bullets(&expansion.tech_stack, "  "),
    ))
}

/// The spoken pitch. TTS models read their input aloud, so this is the pitch
/// itself rather than an instruction to write one.
pub fn pitch_text(idea: &Idea) -> String {
    let founding = idea.founding();
    format!(
        "Say cheerfully and persuasively: Presenting \"{}\"! It's a groundbreaking AI agent that {}. \
         We're targeting {}, with a clear monetization strategy through {}. \
         We believe this is a visionary concept with huge potential!",
        founding.name, founding.description, founding.target_audience, founding.monetization
    )
}

/// System instruction for a follow-up chat, seeded from everything the idea
/// has accumulated so far.
pub fn chat_context(idea: &Idea) -> String {
    let founding = idea.founding();
    let mut context = format!(
        "You are an expert AI project strategist and software architect, acting as a collaborative partner. \
         Your goal is to help the user refine and iterate on their existing AI Agent project idea. \
         You are now in a conversation about the following project:\n\n\
         --- PROJECT CONTEXT ---\n\
         Project Name: {}\n\
         Description: {}\n\
         Target Audience: {}\n\
         Monetization Strategy: {}\n",
        founding.name, founding.description, founding.target_audience, founding.monetization
    );

    if let Some(expansion) = idea.expansion() {
        context.push_str(&format!(
            "\n## Project Plan\n### MVP Features\n{}\n\n### Tech Stack\n{}\n\n### Potential Challenges\n{}\n",
            bullets(&expansion.mvp_features, ""),
            bullets(&expansion.tech_stack, ""),
            bullets(&expansion.potential_challenges, ""),
        ));
    }

    if let Some(files) = idea.code_scaffold().filter(|files| !files.is_empty()) {
        let blocks = files
            .iter()
            .map(|file| format!("### `{}`\n```python\n{}\n```", file.file_name, file.code))
            .collect::<Vec<_>>()
            .join("\n\n");
        context.push_str(&format!("\n## Code Scaffold\n{blocks}\n"));
    }

    context.push_str(
        "\n--- END CONTEXT ---\n\n\
         Engage in a helpful conversation. Answer the user's questions, provide suggestions, and help them modify \
         any part of the project plan. Be ready to suggest alternative names, modify features, discuss the tech stack, \
         or even rewrite code snippets. Start the conversation by introducing yourself briefly and confirming you \
         understand the project context. Keep your responses concise and helpful.",
    );
    context
}
