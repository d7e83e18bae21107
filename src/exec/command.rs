// src/exec/command.rs

//! Runner command templates.

use crate::exec::backend::SubmitRequest;

/// Command template used to run one job, e.g.
/// `run_analysis --analysis {logic_name} --input-id {input_id}`.
///
/// Every substituted value is single-quoted for `sh`, so input ids and
/// parameter strings containing spaces or quotes arrive as one argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCommand {
    template: String,
}

impl RunnerCommand {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn render(&self, request: &SubmitRequest) -> String {
        let job_id = request.job_id.to_string();
        let substitutions: [(&str, &str); 6] = [
            ("{job_id}", &job_id),
            ("{input_id}", &request.input_id.id),
            ("{input_id_type}", request.input_id.id_type.as_str()),
            ("{logic_name}", &request.logic_name),
            ("{module}", &request.module),
            ("{parameters}", &request.parameters),
        ];

        // Single left-to-right scan, so a value that happens to contain a
        // placeholder is never expanded again.
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            match substitutions.iter().find(|(p, _)| tail.starts_with(p)) {
                Some((placeholder, value)) => {
                    out.push_str(&shell_quote(value));
                    rest = &tail[placeholder.len()..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
