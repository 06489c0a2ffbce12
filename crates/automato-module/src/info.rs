//! The self-description a module sends in reply to `UPDATE_INFO`.

use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    Writer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    #[serde(rename = "CommandName")]
    pub name: String,
    #[serde(rename = "CommandID")]
    pub id: u8,
    #[serde(rename = "ReturnFormat")]
    pub return_format: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub role: Role,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Commands")]
    pub commands: Vec<CommandInfo>,
}

impl ModuleInfo {
    pub fn new(name: impl Into<String>, role: Role, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            description: description.into(),
            commands: Vec::new(),
        }
    }

    pub fn command(mut self, id: u8, name: impl Into<String>, return_format: impl Into<String>) -> Self {
        self.commands.push(CommandInfo {
            name: name.into(),
            id,
            return_format: return_format.into(),
        });
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_wire_field_names() {
        let json = ModuleInfo::new("relay", Role::Writer, "fan relay")
            .command(1, "on", "void")
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["Name"], "relay");
        assert_eq!(value["Type"], "writer");
        assert_eq!(value["Commands"][0]["CommandID"], 1);
        assert_eq!(value["Commands"][0]["ReturnFormat"], "void");
    }
}
