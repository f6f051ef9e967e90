//! Built-in output-format templates seeded into an empty store.

use crate::retrieval::AgentType;

const VERIFICATION: &str = "【出力形式】
以下の構成で検証計画をプレーンテキスト形式で出力してください:

検証計画: [設備/技術名]

1. 背景と目的
背景: なぜこの検証が必要か
目的: 何を達成したいか

2. 検証項目
項目ごとに次を記載:
検証内容: 具体的な検証手順（ステップバイステップ）
判定基準: 合格/不合格の基準（数値で明確に）
N数: 評価に必要なワークの数
備考: 必要に応じて

3. 判定基準
総合合格基準、重要項目、制約条件

4. 除外事項
ユーザー所有のチェックシートで既に扱う項目（安全チェック、意地悪動作、TM確認、
指摘事項の改善確認、治具・要領書・消耗品の準備など）は出力不要
";

const SPECIFICATION: &str = "【出力形式】
以下の構成で仕様書をプレーンテキスト形式で出力してください:

## 設備仕様書: [設備名]

### 1. 概要
設備名称、型番、メーカー、用途、導入目的、適用工程

### 2. 主要仕様
| 項目 | 仕様 | 備考 |
|------|------|------|
| 外形寸法 | W × D × H (mm) | 設置に必要なスペース |
| 重量 | ○○ kg | 床耐荷重の確認 |
| 電源 | AC ○○V, ○○Hz, ○○kW | 専用回路の要否 |
| 処理能力 | ○○ 個/分 | 生産タクトへの影響 |
| 精度 | ±○○mm | 品質要求との照合 |

### 3. 機能詳細
### 4. 運用条件
### 5. 設置要件
### 6. メンテナンス
### 7. 関連規格・法規制
### 8. コスト情報
### 9. 付属品・オプション
### 10. 導入スケジュール
### 11. 教育・トレーニング
";

const QUERY_SUPPORT: &str = "【回答形式のガイドライン】
- ユーザーが指定した形式（箇条書き、レポート形式など）で回答
- 指定がない場合はプレーンテキスト形式の箇条書きで回答
- 検索結果が0件の場合は「該当する情報が見つかりませんでした」と正直に伝える

【回答時の注意事項】
- 不確実な情報には「参考情報」と明記
- 安全性に関わる事項は特に慎重に記載
";

/// Every agent type that carries templates.
pub(super) const AGENT_TYPES: [AgentType; 3] = [
    AgentType::Verification,
    AgentType::Specification,
    AgentType::Default,
];

/// Built-in template text of an agent type.
pub(super) fn editable_prompt(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::Verification => VERIFICATION,
        AgentType::Specification => SPECIFICATION,
        AgentType::Default => QUERY_SUPPORT,
    }
}

/// Stable id of an agent type's built-in template.
pub(super) fn template_id(agent_type: AgentType) -> String {
    format!("default-{}", agent_type.as_str())
}
