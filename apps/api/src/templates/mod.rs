//! Template registry: the fixed set of report schemas a transform can target.
//!
//! Each template pairs an ordered column list with an extraction hint that is
//! interpolated into the prompt. The `custom` template has no columns of its own;
//! callers supply them at request time as a comma/newline separated string.

use thiserror::Error;

pub const CUSTOM_TEMPLATE_ID: &str = "custom";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("未知模板：{0}")]
    UnknownTemplate(String),

    #[error("请至少输入一个列名。")]
    EmptyColumns,
}

/// Static template definition. `columns` is empty for the dynamic variant.
#[derive(Debug, Clone, Copy)]
pub struct TemplateConfig {
    pub label: &'static str,
    pub hint: &'static str,
    pub columns: &'static [&'static str],
}

impl TemplateConfig {
    pub fn is_dynamic(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A template with its columns fixed for one transform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTemplate {
    pub label: String,
    pub hint: String,
    pub columns: Vec<String>,
}

/// Registry in display order.
pub const TEMPLATES: &[(&str, TemplateConfig)] = &[
    (
        "public",
        TemplateConfig {
            label: "公域流量",
            hint: "提取账号状态、剪辑发布及客资。日期统一为 YYYY/MM/DD。",
            columns: &[
                "日期",
                "运营人",
                "IP",
                "今日此IP封号数",
                "今日此IP可用账号数",
                "今日此IP剪辑数",
                "今日审核数",
                "今日此IP视频发布数",
                "今日总文案数",
                "今日客资数",
            ],
        },
    ),
    (
        "private",
        TemplateConfig {
            label: "私域运营",
            hint: "根据客资转化路径提取。'今日总客资'列将尝试从文本汇总提取。",
            columns: &[
                "日期",
                "私域",
                "今日新分配客资",
                "今日新微信客资",
                "今日总客资",
                "以往未接通客资",
                "今日未接通客资",
                "今日无效客资",
                "今日加微信客资",
                "今日签约客户",
                "客户今日上门/已操作客户",
                "今日放款客户",
            ],
        },
    ),
    (
        CUSTOM_TEMPLATE_ID,
        TemplateConfig {
            label: "✨ 自定义",
            hint: "手动指定列名，AI 将根据你的定义灵活提取数据。",
            columns: &[],
        },
    ),
];

pub fn all() -> &'static [(&'static str, TemplateConfig)] {
    TEMPLATES
}

pub fn get(id: &str) -> Option<&'static TemplateConfig> {
    TEMPLATES
        .iter()
        .find(|(key, _)| *key == id)
        .map(|(_, config)| config)
}

/// Splits user-entered column names on commas (ASCII or full-width) and newlines.
/// Entries are trimmed; empty ones are dropped.
pub fn parse_custom_columns(input: &str) -> Vec<String> {
    input
        .split(|c: char| matches!(c, ',' | '，' | '\n' | '\r'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Resolves a template id into the label, hint and ordered columns for one call.
///
/// `custom_columns` is only consulted for the dynamic template.
pub fn resolve(id: &str, custom_columns: Option<&str>) -> Result<ResolvedTemplate, TemplateError> {
    let config = get(id).ok_or_else(|| TemplateError::UnknownTemplate(id.to_string()))?;

    let columns = if config.is_dynamic() {
        let columns = parse_custom_columns(custom_columns.unwrap_or_default());
        if columns.is_empty() {
            return Err(TemplateError::EmptyColumns);
        }
        columns
    } else {
        config.columns.iter().map(|c| c.to_string()).collect()
    };

    Ok(ResolvedTemplate {
        label: config.label.to_string(),
        hint: config.hint.to_string(),
        columns,
    })
}
