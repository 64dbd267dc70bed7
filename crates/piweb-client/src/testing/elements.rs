use super::{MockElement, MockState};
use crate::{SdkError, SdkResult};
use serde_json::{Value, json};

impl MockState {
    pub(crate) fn insert_element(
        &mut self,
        parent: &str,
        name: &str,
        description: Option<String>,
        hidden_lookups: u32,
    ) -> String {
        let web_id = self.allocate_id("E");
        let parent_path = self
            .databases
            .get(parent)
            .cloned()
            .or_else(|| self.elements.get(parent).map(|element| element.path.clone()))
            .unwrap_or_else(|| format!("\\\\{parent}"));
        self.elements.insert(
            web_id.clone(),
            MockElement {
                web_id: web_id.clone(),
                parent: parent.to_string(),
                name: name.to_string(),
                description,
                path: format!("{parent_path}\\{name}"),
                hidden_lookups,
            },
        );
        web_id
    }

    fn ensure_parent(&self, parent: &str) -> SdkResult<()> {
        if self.databases.contains_key(parent) || self.elements.contains_key(parent) {
            return Ok(());
        }
        Err(SdkError::not_found("parent", parent))
    }

    /// Lists visible children; each listing brings lagging children one step
    /// closer to visibility.
    pub(crate) fn list_children(
        &mut self,
        parent: &str,
        name_filter: Option<&str>,
    ) -> SdkResult<Value> {
        self.ensure_parent(parent)?;
        let mut items = Vec::new();
        for element in self.elements.values_mut() {
            if element.parent != parent {
                continue;
            }
            if element.hidden_lookups > 0 {
                element.hidden_lookups -= 1;
                continue;
            }
            let matches = match name_filter {
                None | Some("*") => true,
                Some(filter) => element.name.eq_ignore_ascii_case(filter),
            };
            if matches {
                items.push(element_json(element));
            }
        }
        Ok(json!({ "Items": items }))
    }

    pub(crate) fn create_child(&mut self, parent: &str, body: Option<&Value>) -> SdkResult<Value> {
        self.ensure_parent(parent)?;
        let body = body.ok_or_else(|| {
            SdkError::InvalidArgument("element definition body is required".to_string())
        })?;
        let name = body
            .get("Name")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| SdkError::InvalidArgument("element Name is required".to_string()))?;

        let duplicate = self
            .elements
            .values()
            .any(|element| element.parent == parent && element.name.eq_ignore_ascii_case(name));
        if duplicate && !self.allow_duplicate_siblings {
            return Err(SdkError::Conflict(format!(
                "an element named '{name}' already exists under {parent}"
            )));
        }

        let description = body
            .get("Description")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);
        let lag = self.visibility_lag;
        self.insert_element(parent, name, description, lag);
        Ok(Value::Null)
    }

    pub(crate) fn element(&self, web_id: &str) -> SdkResult<Value> {
        self.elements
            .get(web_id)
            .filter(|element| element.hidden_lookups == 0)
            .map(element_json)
            .ok_or_else(|| SdkError::not_found("element", web_id))
    }
}

fn element_json(element: &MockElement) -> Value {
    json!({
        "WebId": element.web_id,
        "Id": element.web_id,
        "Name": element.name,
        "Description": element.description,
        "Path": element.path,
    })
}
