use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A company visible to a logged-in remote session.
///
/// Only the id and name are interpreted; every other field the remote API
/// returns is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    #[serde(rename = "CompanyId")]
    pub company_id: i32,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Company {
    pub fn new(company_id: i32, name: impl Into<String>) -> Self {
        Self {
            company_id,
            name: name.into(),
            extra: Map::new(),
        }
    }

    /// Find a company by id in a session's company list.
    pub fn find(companies: &[Company], company_id: i32) -> Option<&Company> {
        companies.iter().find(|c| c.company_id == company_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_unknown_remote_fields() {
        let company: Company = serde_json::from_value(json!({
            "CompanyId": 12114,
            "Name": "Demo ApS",
            "Country": "Denmark"
        }))
        .unwrap();
        assert_eq!(company.company_id, 12114);
        assert_eq!(company.extra["Country"], "Denmark");

        let back = serde_json::to_value(&company).unwrap();
        assert_eq!(back["Country"], "Denmark");
    }

    #[test]
    fn find_by_id() {
        let companies = vec![Company::new(1, "One"), Company::new(2, "Two")];
        assert_eq!(Company::find(&companies, 2).unwrap().name, "Two");
        assert!(Company::find(&companies, 3).is_none());
    }
}
