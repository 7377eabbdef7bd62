//! Prompt templates for the generation stages.
//!
//! Templates are plain strings with `{text}`, `{text_length}` and
//! `{target_length}` placeholders, substituted verbatim at render time — no
//! templating engine. Built-in templates can be replaced from a file.

use std::fs;
use std::path::Path;

use crate::error::{RedraftError, Result};

/// Placeholder for the segment text. Required in every template.
pub const TEXT_PLACEHOLDER: &str = "{text}";
/// Placeholder for the segment length in characters.
pub const TEXT_LENGTH_PLACEHOLDER: &str = "{text_length}";
/// Placeholder for the target output length in characters.
pub const TARGET_LENGTH_PLACEHOLDER: &str = "{target_length}";

/// Written-style rewrite instructions for raw meeting transcripts.
const POLISH_TEMPLATE: &str = r#"<instructions>
<role>你是一位专业的语言编辑，擅长将口语化的会议逐字稿转换为正式的书面语文档。</role>
<task>
逐句书面化改写，不做总结：
1. 对原文中的每一句话进行书面化改写，严禁总结、概括或归纳，不要无中生有。
2. 删除口语词（"那个"、"然后"、"就是说"、"呃"、"嗯"、"啊"等），保留所有实质性内容、数据、观点和讨论细节。
3. 保留所有说话人的所有发言；输入每句话开头带说话人标签（如[说话人:0]），输出时把同一说话人的连续发言合并为一个段落。
4. 标签后没有内容的行不要输出，也不要输出空白行。
5. 输出格式：说话人标识统一用【说话人】（书名号），一个说话人一个段落，段落结束换行。
6. 严禁添加标题、说明性文字、前言或总结；只输出对话本身，从第一个说话人开始，到最后一个说话人结束。
</task>
<input>
<metadata><original_text_length unit="characters">{text_length}</original_text_length></metadata>
<content><![CDATA[{text}]]></content>
</input>
<output_requirement>
<target_length unit="characters"><value>{target_length}</value><tolerance>±10%</tolerance></target_length>
<format>直接输出逐句书面化改写后的对话</format>
</output_requirement>
</instructions>"#;

/// Translation instructions for polished transcripts.
const TRANSLATE_TEMPLATE: &str = r#"请将以下中文会议纪要翻译成英文。要求：
1. 保持专业的商务/学术语言风格
2. 保留说话人标识格式：[Speaker Name/Role]:
3. 确保翻译准确、流畅、地道
4. 不要添加任何额外说明

需要翻译的内容：

{text}"#;

/// A renderable prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    /// Built-in polish (written-style rewrite) template.
    pub fn polish() -> Self {
        Self {
            template: POLISH_TEMPLATE.to_string(),
        }
    }

    /// Built-in translation template.
    pub fn translate() -> Self {
        Self {
            template: TRANSLATE_TEMPLATE.to_string(),
        }
    }

    /// Loads a custom template from a file.
    ///
    /// The file must contain the `{text}` placeholder; the length
    /// placeholders are optional.
    pub fn from_file(path: &Path) -> Result<Self> {
        let template = fs::read_to_string(path)?;
        Self::from_string(template)
    }

    /// Builds a template from a string, validating placeholders.
    pub fn from_string(template: String) -> Result<Self> {
        if !template.contains(TEXT_PLACEHOLDER) {
            return Err(RedraftError::TemplateMissingPlaceholder {
                placeholder: TEXT_PLACEHOLDER.to_string(),
            });
        }
        Ok(Self { template })
    }

    /// Renders the template for one segment.
    ///
    /// `target_ratio` scales the segment's character count into the
    /// `{target_length}` placeholder (the polish stage asks for 80% of the
    /// input length, with the band communicated as a tolerance).
    pub fn render(&self, text: &str, target_ratio: f64) -> String {
        let text_length = text.chars().count();
        let target_length = (text_length as f64 * target_ratio) as usize;

        self.template
            .replace(TEXT_PLACEHOLDER, text)
            .replace(TEXT_LENGTH_PLACEHOLDER, &text_length.to_string())
            .replace(TARGET_LENGTH_PLACEHOLDER, &target_length.to_string())
    }
}
