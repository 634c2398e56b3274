//! Движок продлений VPN-подписок поверх панели 3x-ui: фоновая сверка
//! платежей YooMoney, предупреждения об истечении и клиентский
//! Telegram-бот.

pub mod core;
pub mod gateway;
pub mod panel;
pub mod storage;
pub mod telegram;

pub use crate::core::error::{AppError, AppResult};
pub use crate::storage::db::{create_pool, get_connection, DbPool};
