//! 工具注册表
//!
//! 工具集合是封闭的：CampusTool 枚举列出全部六个操作，按名查找只发生在 LLM 边界（from_name），
//! 之后由 match 分派到带类型参数的处理函数。对 LLM 暴露的仍是 {name, args} 形式。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ToolSpec;
use crate::tools::schema::{
    parameters_schema, AddStudentArgs, NoArgs, StudentIdArgs, UpdateStudentArgs,
};

/// 校园管理工具
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampusTool {
    AddStudent,
    GetStudent,
    UpdateStudent,
    DeleteStudent,
    ListStudents,
    GetCampusAnalytics,
}

impl CampusTool {
    pub fn all() -> [CampusTool; 6] {
        [
            CampusTool::AddStudent,
            CampusTool::GetStudent,
            CampusTool::UpdateStudent,
            CampusTool::DeleteStudent,
            CampusTool::ListStudents,
            CampusTool::GetCampusAnalytics,
        ]
    }

    /// 工具名称（LLM 调用时使用）
    pub fn name(&self) -> &'static str {
        match self {
            CampusTool::AddStudent => "add_student",
            CampusTool::GetStudent => "get_student",
            CampusTool::UpdateStudent => "update_student",
            CampusTool::DeleteStudent => "delete_student",
            CampusTool::ListStudents => "list_students",
            CampusTool::GetCampusAnalytics => "get_campus_analytics",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().into_iter().find(|t| t.name() == name.trim())
    }

    /// 工具描述（供 LLM 理解功能）
    pub fn description(&self) -> &'static str {
        match self {
            CampusTool::AddStudent => {
                "Add a new student to the campus database with automatic welcome email."
            }
            CampusTool::GetStudent => "Get detailed student information by student ID.",
            CampusTool::UpdateStudent => {
                "Update student information. Allowed fields: name, department, email. Sends a notification email."
            }
            CampusTool::DeleteStudent => {
                "Delete a student from the database (no email notification sent)."
            }
            CampusTool::ListStudents => "Get a list of all students in the database.",
            CampusTool::GetCampusAnalytics => {
                "Get comprehensive campus statistics and analytics."
            }
        }
    }

    /// 参数 JSON Schema
    pub fn parameters_schema(&self) -> Value {
        match self {
            CampusTool::AddStudent => parameters_schema::<AddStudentArgs>(),
            CampusTool::GetStudent | CampusTool::DeleteStudent => {
                parameters_schema::<StudentIdArgs>()
            }
            CampusTool::UpdateStudent => parameters_schema::<UpdateStudentArgs>(),
            CampusTool::ListStudents | CampusTool::GetCampusAnalytics => {
                parameters_schema::<NoArgs>()
            }
        }
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// 全部工具的 LLM 描述
pub fn tool_specs() -> Vec<ToolSpec> {
    CampusTool::all().iter().map(CampusTool::spec).collect()
}
