//! Read access to a purchase request, as needed by the expense form.

use forgeerp_core::UserId;
use forgeerp_purchasing::{
    PurchaseRequest, PurchaseRequestId, PurchaseRequestLine, PurchaseRequestStatus,
};

/// Anything that can stand in for a purchase request when staging expense lines.
///
/// Implemented by the aggregate itself and by the infra read model, so the
/// form can be fed from whichever the caller has at hand.
pub trait PurchaseRequestSource {
    fn request_id(&self) -> PurchaseRequestId;
    fn requested_by(&self) -> Option<UserId>;
    fn status(&self) -> PurchaseRequestStatus;
    fn lines(&self) -> &[PurchaseRequestLine];
}

impl PurchaseRequestSource for PurchaseRequest {
    fn request_id(&self) -> PurchaseRequestId {
        self.id_typed()
    }

    fn requested_by(&self) -> Option<UserId> {
        PurchaseRequest::requested_by(self)
    }

    fn status(&self) -> PurchaseRequestStatus {
        PurchaseRequest::status(self)
    }

    fn lines(&self) -> &[PurchaseRequestLine] {
        PurchaseRequest::lines(self)
    }
}
