pub mod lcd;
pub mod rpc;

pub use lcd::LcdClient;
pub use rpc::RpcClient;
