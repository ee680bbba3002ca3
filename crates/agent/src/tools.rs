use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use orderly_core::catalog::MenuCatalog;
use orderly_core::domain::cart::{Cart, CartLine, PurchaseInformation};
use orderly_core::errors::DomainError;
use orderly_core::flows::ToolName;

/// Tool schema as offered to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Read-only view of the session handed to generic tools.
#[derive(Clone, Debug, Default)]
pub struct ToolContext {
    pub user_id: String,
    pub cart: Option<Cart>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value>;
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AddToCartArgs {
    pub purchase_burger_item: CartLine,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RemoveFromCartArgs {
    pub purchase_burger_item: CartLine,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct PurchaseArgs {
    #[serde(default)]
    pub purchase_information: Option<Value>,
}

impl PurchaseArgs {
    /// The supplied purchase, or `None` when it is absent or has no items.
    pub fn purchase_information(&self) -> Result<Option<PurchaseInformation>, DomainError> {
        let Some(raw) = self.purchase_information.as_ref() else {
            return Ok(None);
        };
        let is_blank = match raw {
            Value::Null => true,
            Value::Object(fields) => fields.is_empty(),
            Value::String(text) => text.trim().is_empty(),
            _ => false,
        };
        if is_blank {
            return Ok(None);
        }

        // Some models send the nested object as a JSON string.
        let parsed = match raw {
            Value::String(text) => serde_json::from_str::<PurchaseInformation>(text),
            other => serde_json::from_value::<PurchaseInformation>(other.clone()),
        }
        .map_err(|error| invalid_arguments(ToolName::PurchaseBurgerItems, error))?;

        Ok((!parsed.items.is_empty()).then_some(parsed))
    }
}

/// Decodes a tool call's JSON arguments into its typed request.
pub fn parse_arguments<T>(tool: ToolName, arguments: &Value) -> Result<T, DomainError>
where
    T: for<'de> Deserialize<'de>,
{
    let arguments = match arguments {
        Value::Null => json!({}),
        other => other.clone(),
    };
    serde_json::from_value(arguments).map_err(|error| invalid_arguments(tool, error))
}

fn invalid_arguments(tool: ToolName, error: serde_json::Error) -> DomainError {
    DomainError::InvalidToolArguments {
        tool_name: tool.as_str().to_string(),
        reason: error.to_string(),
    }
}

fn cart_line_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "integer", "description": "Menu item id" },
            "name": { "type": "string" },
            "price": { "type": "number", "description": "Unit price in KRW" },
            "quantity": { "type": "integer", "minimum": 1 },
            "options": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer" },
                        "name": { "type": "string" },
                        "price": { "type": "number" }
                    },
                    "required": ["id", "name", "price"]
                }
            }
        },
        "required": ["id", "name", "price", "quantity"]
    })
}

fn no_parameters() -> Value {
    json!({ "type": "object", "properties": {} })
}

pub fn tool_definition(tool: ToolName) -> ToolDefinition {
    let (description, parameters) = match tool {
        ToolName::PurchaseBurgerItems => (
            "Purchase the selected burger items. \
             Call this when the user confirms the purchase of the burgers.",
            json!({
                "type": "object",
                "properties": {
                    "purchase_information": {
                        "type": "object",
                        "properties": {
                            "items": { "type": "array", "items": cart_line_schema() },
                            "total_price": { "type": "number" },
                            "total_items": { "type": "integer" },
                            "total_quantity": { "type": "integer" }
                        },
                        "required": ["items"]
                    }
                },
                "required": ["purchase_information"]
            }),
        ),
        ToolName::SuggestBurgers => (
            "Suggestions for burgers based on user preferences. \
             Call this when the user wants to see suggestions.",
            no_parameters(),
        ),
        ToolName::GetCurrentPurchaseInformation => (
            "Get the current purchase information for the user. \
             Call this when the user wants to view the cart.",
            no_parameters(),
        ),
        ToolName::AddBurgerToCart => (
            "Add a burger item to the cart for later purchase.",
            json!({
                "type": "object",
                "properties": { "purchase_burger_item": cart_line_schema() },
                "required": ["purchase_burger_item"]
            }),
        ),
        ToolName::RemoveBurgerFromCart => (
            "Remove a burger item from the cart.",
            json!({
                "type": "object",
                "properties": { "purchase_burger_item": cart_line_schema() },
                "required": ["purchase_burger_item"]
            }),
        ),
        ToolName::ExecutePurchase => (
            "Record of an executed purchase.",
            json!({
                "type": "object",
                "properties": { "purchase_information": { "type": "object" } }
            }),
        ),
    };

    ToolDefinition {
        name: tool.as_str().to_string(),
        description: description.to_string(),
        parameters,
    }
}

/// Schemas of every tool the model may call, in declaration order.
pub fn declared_tools() -> Vec<ToolDefinition> {
    ToolName::DECLARED.iter().copied().map(tool_definition).collect()
}

pub struct SuggestBurgersTool {
    catalog: MenuCatalog,
}

impl SuggestBurgersTool {
    pub fn new(catalog: MenuCatalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for SuggestBurgersTool {
    fn name(&self) -> &'static str {
        ToolName::SuggestBurgers.as_str()
    }

    async fn execute(&self, _input: Value, _context: &ToolContext) -> Result<Value> {
        Ok(json!({ "burgerItems": self.catalog.items() }))
    }
}

#[derive(Default)]
pub struct CurrentPurchaseInformationTool;

#[async_trait]
impl Tool for CurrentPurchaseInformationTool {
    fn name(&self) -> &'static str {
        ToolName::GetCurrentPurchaseInformation.as_str()
    }

    async fn execute(&self, _input: Value, context: &ToolContext) -> Result<Value> {
        Ok(serde_json::to_value(&context.cart)?)
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Registry with the generic tools of the burger menu.
    pub fn with_defaults(catalog: MenuCatalog) -> Self {
        let mut registry = Self::default();
        registry.register(SuggestBurgersTool::new(catalog));
        registry.register(CurrentPurchaseInformationTool);
        registry
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(Box::as_ref)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names = self.tools.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Renders a tool's JSON output as tool-result message content.
pub fn render_tool_output(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
