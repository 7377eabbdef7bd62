//! Sampling parameters submitted with every generation request.

use serde::{Deserialize, Serialize};

/// Fixed sampling parameter set for one stage.
///
/// Stateless per request: segments share the same parameters but no
/// cross-segment state reaches the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    /// Context window size (`num_ctx` in the Ollama options map).
    pub context_window: u32,
    /// Output token ceiling (`num_predict` / `max_tokens`).
    pub max_output_tokens: u32,
    /// Stop sequences cutting off runaway epilogues.
    pub stop: Vec<String>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self::polish()
    }
}

impl SamplingParams {
    /// Parameters tuned for the written-style rewrite stage: low temperature
    /// and tight top-p/top-k keep the output close to the source.
    pub fn polish() -> Self {
        Self {
            temperature: 0.3,
            top_p: 0.85,
            top_k: 30,
            repeat_penalty: 1.15,
            presence_penalty: 0.2,
            frequency_penalty: 0.2,
            context_window: 131_072,
            max_output_tokens: 8192,
            stop: default_stop(),
        }
    }

    /// Parameters for the translation stage.
    pub fn translate() -> Self {
        Self {
            temperature: 0.5,
            max_output_tokens: 4096,
            ..Self::polish()
        }
    }

    /// Renders the parameter set as an Ollama `options` map.
    pub fn to_ollama_options(&self) -> serde_json::Value {
        serde_json::json!({
            "temperature": self.temperature,
            "top_p": self.top_p,
            "top_k": self.top_k,
            "repeat_penalty": self.repeat_penalty,
            "presence_penalty": self.presence_penalty,
            "frequency_penalty": self.frequency_penalty,
            "num_ctx": self.context_window,
            "num_predict": self.max_output_tokens,
            "stop": self.stop,
        })
    }
}

fn default_stop() -> Vec<String> {
    vec![
        "\n\n\n".to_string(),
        "============".to_string(),
        "End of".to_string(),
        "【结束】".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polish_and_translate_share_everything_but_temperature_and_budget() {
        let polish = SamplingParams::polish();
        let translate = SamplingParams::translate();

        assert_eq!(polish.temperature, 0.3);
        assert_eq!(translate.temperature, 0.5);
        assert_eq!(polish.max_output_tokens, 8192);
        assert_eq!(translate.max_output_tokens, 4096);
        assert_eq!(polish.top_p, translate.top_p);
        assert_eq!(polish.stop, translate.stop);
    }

    #[test]
    fn ollama_options_use_native_key_names() {
        let options = SamplingParams::polish().to_ollama_options();
        assert_eq!(options["num_ctx"], 131_072);
        assert_eq!(options["num_predict"], 8192);
        assert_eq!(options["top_k"], 30);
        assert!(options["stop"].as_array().is_some());
    }

    #[test]
    fn params_deserialize_with_partial_toml() {
        let params: SamplingParams = toml::from_str("temperature = 0.7").unwrap();
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.top_p, SamplingParams::polish().top_p);
    }
}
