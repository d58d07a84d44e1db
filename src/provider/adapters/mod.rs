mod bankdirect;
mod walletpay;

pub use bankdirect::BankDirectAdapter;
pub use walletpay::WalletPayAdapter;
