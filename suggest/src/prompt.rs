use autoterm_core::Goal;

pub fn system_instruction(language: &str) -> String {
    format!(
        "You are an assistant helping to achieve the following target. Respond in {language}. Provide only the next command."
    )
}

pub fn user_prompt(goal: &Goal) -> String {
    format!("Target: {goal}\nProvide only the next command to achieve this target step by step.")
}

/// Returns the final line of a suggestion, which is treated as the command
/// to run. No other parsing is applied.
pub fn extract_command(suggestion: &str) -> &str {
    let last_line = suggestion.rsplit('\n').next().unwrap_or(suggestion);
    last_line.strip_suffix('\r').unwrap_or(last_line)
}

#[cfg(test)]
mod tests {
    use autoterm_core::Goal;
    use pretty_assertions::assert_eq;

    use super::extract_command;
    use super::system_instruction;
    use super::user_prompt;

    #[test]
    fn system_instruction_names_the_reply_language() {
        assert_eq!(
            system_instruction("pt-BR"),
            "You are an assistant helping to achieve the following target. Respond in pt-BR. Provide only the next command."
        );
    }

    #[test]
    fn user_prompt_embeds_the_goal() {
        assert_eq!(
            user_prompt(&Goal::new("list files")),
            "Target: list files\nProvide only the next command to achieve this target step by step."
        );
    }

    #[test]
    fn command_is_the_last_line() {
        assert_eq!(extract_command("ls -la"), "ls -la");
        assert_eq!(
            extract_command("First list the directory:\nls -la"),
            "ls -la"
        );
        assert_eq!(extract_command("step one\r\nls -la\r"), "ls -la");
        assert_eq!(extract_command(""), "");
    }

    #[test]
    fn trailing_newline_yields_an_empty_command() {
        assert_eq!(extract_command("ls -la\n"), "");
    }
}
