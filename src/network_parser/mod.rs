//! 远端内容 API 访问：登录、带 token 的资源获取、传输层重试。

pub mod network;
