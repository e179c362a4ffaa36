// Extraction prompt for the daily-report transform.
// The column numbering is the output column-order contract, so keep it 1-based
// and in caller order.

const TASK_HEADER: &str = "任务：将非结构化多人日报转换为飞书多维表格可用的TSV数据（无表头）。";

const COLUMNS_HEADER: &str = "列定义（必须按顺序严格对齐）：";

const EXTRACTION_RULES: &str = "要求：
1. 【同义词识别】提取“总客资”、“客资”等关键词数值填入对应列。
2. 【多人识别】一人一事一行。
3. 【日期格式】统一为 YYYY/MM/DD。
4. 【全局补零】缺失数值必须填【0】。
5. 【严格格式】仅输出 TSV 文本，用制表符（\t）分隔，严禁 Markdown 代码块，不要输出表头、前言或任何解释。";

/// Renders `columns` as `1. a`, `2. b`, ... one per line.
pub fn numbered_columns(columns: &[String]) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{}. {}", i + 1, col))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the single instruction prompt sent to the completion service.
/// `raw_text` is appended verbatim as the last section.
pub fn build_prompt(columns: &[String], hint: &str, raw_text: &str) -> String {
    format!(
        "{TASK_HEADER}\n\n{COLUMNS_HEADER}\n{}\n\n{EXTRACTION_RULES}\n\n背景：{hint}\n待处理内容：\n{raw_text}",
        numbered_columns(columns)
    )
}
