use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Nodes of the ordering graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    InvokeModel,
    RunTool,
    AddToCart,
    RemoveFromCart,
    PreparePurchase,
    PurchaseApproval,
    ExecutePurchase,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvokeModel => "invoke-model",
            Self::RunTool => "run-tool",
            Self::AddToCart => "add-to-cart",
            Self::RemoveFromCart => "remove-from-cart",
            Self::PreparePurchase => "prepare-purchase",
            Self::PurchaseApproval => "purchase-approval",
            Self::ExecutePurchase => "execute-purchase",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tools known to the graph. Names are the wire names the model uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolName {
    #[serde(rename = "purchase_burger_items")]
    PurchaseBurgerItems,
    #[serde(rename = "add_burger_to_cart_tool")]
    AddBurgerToCart,
    #[serde(rename = "remove_burger_from_cart_tool")]
    RemoveBurgerFromCart,
    #[serde(rename = "get_current_purchase_information")]
    GetCurrentPurchaseInformation,
    #[serde(rename = "suggest_burgers")]
    SuggestBurgers,
    /// Emitted by the graph itself when a purchase executes; never offered to the model.
    #[serde(rename = "execute_purchase")]
    ExecutePurchase,
}

impl ToolName {
    /// Tools declared to the model, in declaration order.
    pub const DECLARED: [ToolName; 5] = [
        Self::PurchaseBurgerItems,
        Self::SuggestBurgers,
        Self::GetCurrentPurchaseInformation,
        Self::AddBurgerToCart,
        Self::RemoveBurgerFromCart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PurchaseBurgerItems => "purchase_burger_items",
            Self::AddBurgerToCart => "add_burger_to_cart_tool",
            Self::RemoveBurgerFromCart => "remove_burger_from_cart_tool",
            Self::GetCurrentPurchaseInformation => "get_current_purchase_information",
            Self::SuggestBurgers => "suggest_burgers",
            Self::ExecutePurchase => "execute_purchase",
        }
    }

    /// Graph node that handles a call to this tool.
    pub fn step(&self) -> Step {
        match self {
            Self::PurchaseBurgerItems => Step::PreparePurchase,
            Self::AddBurgerToCart => Step::AddToCart,
            Self::RemoveBurgerFromCart => Step::RemoveFromCart,
            Self::GetCurrentPurchaseInformation | Self::SuggestBurgers | Self::ExecutePurchase => {
                Step::RunTool
            }
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownToolName(pub String);

impl FromStr for ToolName {
    type Err = UnknownToolName;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "purchase_burger_items" => Ok(Self::PurchaseBurgerItems),
            "add_burger_to_cart_tool" => Ok(Self::AddBurgerToCart),
            "remove_burger_from_cart_tool" => Ok(Self::RemoveBurgerFromCart),
            "get_current_purchase_information" => Ok(Self::GetCurrentPurchaseInformation),
            "suggest_burgers" => Ok(Self::SuggestBurgers),
            "execute_purchase" => Ok(Self::ExecutePurchase),
            other => Err(UnknownToolName(other.to_string())),
        }
    }
}

/// Maps a model-emitted tool name to its step; unknown names go to the generic tool runner.
pub fn step_for_tool(name: &str) -> Step {
    name.parse::<ToolName>().map(|tool| tool.step()).unwrap_or(Step::RunTool)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteDecision {
    End,
    Steps(Vec<Step>),
}

/// Outgoing edge of a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edge {
    Goto(Step),
    /// Conditional edge evaluated by the tool-call router.
    Route,
    /// Conditional edge evaluated by the purchase approval decision.
    ApprovalDecision,
    End,
}
