//! Built-in pipeline bindings for the six business domains.
//!
//! A preset is configuration only: which entity fields hold the stage and the
//! value, and which stages a fresh pipeline starts with.

use serde::{Deserialize, Serialize};
use stageboard_common::{PipelineBinding, PipelineType};

/// A stage created when a pipeline has none yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSeed {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl StageSeed {
    pub fn new(display_name: &str, color: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            color: Some(color.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub pipeline: &'static str,
    pub stage_field: &'static str,
    pub value_field: Option<&'static str>,
    pub stages: &'static [(&'static str, &'static str)],
}

impl Preset {
    pub fn binding(&self) -> Option<PipelineBinding> {
        let pipeline: PipelineType = self.pipeline.parse().ok()?;
        let binding = PipelineBinding::new(pipeline, self.stage_field);
        Some(match self.value_field {
            Some(field) => binding.with_value_field(field),
            None => binding,
        })
    }

    pub fn seeds(&self) -> Vec<StageSeed> {
        self.stages
            .iter()
            .map(|(name, color)| StageSeed::new(name, color))
            .collect()
    }
}

pub const PRESETS: &[Preset] = &[
    Preset {
        pipeline: "sales",
        stage_field: "sales_stage",
        value_field: Some("amount"),
        stages: &[
            ("New", "blue"),
            ("Contacted", "cyan"),
            ("Qualified", "purple"),
            ("Proposal", "amber"),
            ("Won", "green"),
            ("Lost", "red"),
        ],
    },
    Preset {
        pipeline: "client",
        stage_field: "client_status",
        value_field: Some("contract_value"),
        stages: &[
            ("Lead", "blue"),
            ("Active", "green"),
            ("On Hold", "amber"),
            ("Churned", "red"),
        ],
    },
    Preset {
        pipeline: "opportunity",
        stage_field: "opportunity_stage",
        value_field: Some("expected_revenue"),
        stages: &[
            ("Prospecting", "blue"),
            ("Qualification", "cyan"),
            ("Negotiation", "amber"),
            ("Closed Won", "green"),
            ("Closed Lost", "red"),
        ],
    },
    Preset {
        pipeline: "task",
        stage_field: "task_stage",
        value_field: None,
        stages: &[
            ("To Do", "gray"),
            ("In Progress", "blue"),
            ("Review", "purple"),
            ("Done", "green"),
        ],
    },
    Preset {
        pipeline: "support",
        stage_field: "support_stage",
        value_field: None,
        stages: &[
            ("Open", "red"),
            ("Pending", "amber"),
            ("Resolved", "green"),
            ("Closed", "gray"),
        ],
    },
    Preset {
        pipeline: "debit",
        stage_field: "debit_stage",
        value_field: Some("amount_due"),
        stages: &[
            ("Pending", "gray"),
            ("Invoiced", "blue"),
            ("Partially Paid", "amber"),
            ("Paid", "green"),
            ("Written Off", "red"),
        ],
    },
];

pub fn find(pipeline: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.pipeline == pipeline)
}
