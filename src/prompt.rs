//! Interactive prompting over explicit input/output handles.

use crate::error::{CapesError, Result};
use std::io::{BufRead, Write};

/// Message printed when a required answer is left empty
pub const REQUIRED_FIELD_NOTICE: &str = "Campo obrigatório. Por favor, preencha.";

/// Reads answers from `input`, writes prompts to `output`
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Ask until a non-empty answer is given; the answer is trimmed.
    ///
    /// # Errors
    ///
    /// Returns an input error on a read failure or when the input ends
    /// before an answer was given.
    pub fn prompt_required(&mut self, label: &str, hint: &str) -> Result<String> {
        loop {
            let prompt = if hint.is_empty() {
                format!("\n{}: ", label)
            } else {
                format!("\n{} ({}): ", label, hint)
            };
            write!(self.output, "{}", prompt).map_err(|e| CapesError::input("failed to write prompt", e))?;
            self.output
                .flush()
                .map_err(|e| CapesError::input("failed to write prompt", e))?;

            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .map_err(|e| CapesError::input("failed to read input", e))?;
            if read == 0 {
                return Err(CapesError::Input {
                    message: format!("input closed before {} was given", label),
                    source: None,
                });
            }

            let answer = line.trim();
            if !answer.is_empty() {
                return Ok(answer.to_string());
            }

            writeln!(self.output, "{}", REQUIRED_FIELD_NOTICE)
                .map_err(|e| CapesError::input("failed to write prompt", e))?;
        }
    }

    /// Give back the output handle
    pub fn into_output(self) -> W {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Cursor;

    #[test]
    fn test_reprompts_on_empty_answer() {
        let input = Cursor::new("\n   \n vacinas covid \n");
        let mut prompter = Prompter::new(input, Vec::new());

        let answer = prompter
            .prompt_required("TERMOS DE BUSCA", "texto livre (obrigatório)")
            .expect("answer");
        assert_eq!(answer, "vacinas covid");

        let output = String::from_utf8(prompter.into_output()).expect("utf8");
        assert_eq!(output.matches("TERMOS DE BUSCA (texto livre (obrigatório)): ").count(), 3);
        assert_eq!(output.matches(REQUIRED_FIELD_NOTICE).count(), 2);
    }

    #[test]
    fn test_end_of_input_is_an_error() {
        let mut prompter = Prompter::new(Cursor::new("\n"), Vec::new());
        let err = prompter.prompt_required("TERMOS DE BUSCA", "").expect_err("eof");
        assert_eq!(err.kind(), ErrorKind::Input);
    }
}
