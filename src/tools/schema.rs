//! 工具参数类型与 JSON Schema（schemars 自动生成，作为 OpenAI function parameters）

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

/// add_student 参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AddStudentArgs {
    /// Full name of the student
    pub name: String,
    /// Unique student ID, e.g. STU011
    #[serde(alias = "id")]
    pub student_id: String,
    /// Department, e.g. Computer Science
    pub department: String,
    /// Student email address
    pub email: String,
}

/// get_student / delete_student 参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StudentIdArgs {
    /// Student ID, e.g. STU003
    #[serde(alias = "id")]
    pub student_id: String,
}

/// update_student 参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateStudentArgs {
    /// Student ID to update
    #[serde(alias = "id")]
    pub student_id: String,
    /// Field to change: one of name, department, email
    pub field: String,
    /// New value for the field
    #[serde(alias = "value")]
    pub new_value: String,
}

/// 无参数工具
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct NoArgs {}

/// 生成参数 schema；去掉 $schema / title 等 LLM 不需要的顶层键
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.remove("description");
        obj.entry("type").or_insert_with(|| Value::String("object".to_string()));
        obj.entry("properties")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    value
}

/// 解析工具参数；null 视为空对象
pub fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, String> {
    let args = if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| e.to_string())
}
