use rust_decimal::Decimal;

use crate::domain::menu::{MenuItem, MenuItemId, MenuOption, MenuOptionId};

const BURGER_MENU: &[(u32, &str, i64)] = &[
    (1, "더블 1955® 버거", 7900),
    (2, "더블 맥스파이시™ 상하이 버거", 8900),
    (3, "더블 쿼터파운더® 치즈", 8500),
    (4, "맥스파이시™ 상하이 버거", 6900),
    (5, "쿼터파운더® 치즈", 6900),
    (6, "토마토 치즈 비프 버거", 6900),
    (7, "빅맥®", 6900),
    (8, "맥크리스피™ 디럭스 버거", 7900),
    (9, "1955® 버거", 6900),
    (10, "맥치킨® 모짜렐라", 6900),
    (11, "맥치킨®", 5900),
    (12, "더블 불고기 버거", 7900),
    (13, "슈슈 버거", 6900),
    (14, "슈비 버거", 6900),
    (15, "베이컨 토마토 디럭스", 7900),
    (16, "더블 치즈버거", 6900),
    (17, "트리플 치즈버거", 7900),
    (18, "치즈버거", 5900),
];

const BURGER_OPTIONS: &[(u32, &str, i64)] = &[(1, "피클", 200)];

/// Static table of purchasable items and add-ons.
#[derive(Clone, Debug, Default)]
pub struct MenuCatalog {
    items: Vec<MenuItem>,
    options: Vec<MenuOption>,
}

impl MenuCatalog {
    pub fn new(items: Vec<MenuItem>, options: Vec<MenuOption>) -> Self {
        Self { items, options }
    }

    pub fn burger_menu() -> Self {
        let items = BURGER_MENU
            .iter()
            .map(|(id, name, price)| MenuItem {
                id: MenuItemId(*id),
                name: (*name).to_string(),
                unit_price: Decimal::from(*price),
            })
            .collect();
        let options = BURGER_OPTIONS
            .iter()
            .map(|(id, name, price)| MenuOption {
                id: MenuOptionId(*id),
                name: (*name).to_string(),
                unit_price: Decimal::from(*price),
            })
            .collect();
        Self::new(items, options)
    }

    pub fn items(&self) -> &[MenuItem] {
        &self.items
    }

    pub fn options(&self) -> &[MenuOption] {
        &self.options
    }

    pub fn find(&self, item_id: MenuItemId) -> Option<&MenuItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn find_option(&self, option_id: MenuOptionId) -> Option<&MenuOption> {
        self.options.iter().find(|option| option.id == option_id)
    }
}
