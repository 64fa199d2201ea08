pub use folio_core::order::{
    DownloadDenial, DownloadLog, DownloadOutcome, NewDownloadLog, NewOrder, NewOrderItem, Order,
    OrderItem, OrderStatus, PaymentConfirmation, PaymentStatus, StatusChange,
};
pub use folio_core::repository::{OrderFilter, OrderPage, OrderSort, Pagination};
