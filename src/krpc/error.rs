use thiserror::Error;

/// Broad grouping of [`DecodeError`]s, used for accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The bytes are not the KRPC subset of bencode we accept.
    Malformed,
    /// Well-formed bencode with missing, oversized or contradictory fields.
    Protocol,
    /// A valid message we refuse to handle.
    Policy,
}

/// Every reason the decoder can refuse a datagram. Variants are stable; each
/// one names exactly one failure edge of the scanner or the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DecodeError {
    #[error("message too long")]
    MessageTooLong,

    #[error("unexpected character")]
    BadChar,

    #[error("unexpected end of message")]
    BadEndOfMessage,

    #[error("dictionary in key position")]
    DictIsKey,

    #[error("negative integer")]
    NegativeInt,

    #[error("dictionaries nested too deep")]
    DictsTooDeep,

    #[error("value outside of a dictionary")]
    NakedValue,

    #[error("integer in key or list position")]
    RogueInt,

    #[error("unexpected list")]
    UnexpectedList,

    #[error("port out of range")]
    PortOverflow,

    #[error("query and reply keys in the same message")]
    InconsistentType,

    #[error("nodes length is not a positive multiple of 26")]
    BadLengthNodes,

    #[error("target is not 20 bytes")]
    BadLengthTarget,

    #[error("id is not 20 bytes")]
    BadLengthNid,

    #[error("info_hash is not 20 bytes")]
    BadLengthInfoHash,

    #[error("peer in values is not 6 bytes")]
    BadLengthPeer,

    #[error("unknown query")]
    UnknownQuery,

    #[error("transaction id too long")]
    TransactionTooLong,

    #[error("token too long")]
    TokenTooLong,

    #[error("error messages are not handled")]
    ErrorType,

    #[error("unknown message type")]
    UnknownType,

    #[error("missing id")]
    MissingNid,

    #[error("missing transaction id")]
    MissingTransaction,

    #[error("missing info_hash")]
    MissingInfoHash,

    #[error("missing port")]
    MissingPort,

    #[error("missing target")]
    MissingTarget,

    #[error("announce token not recognized")]
    TokenUnrecognized,

    #[error("ping carries a body")]
    PingBody,

    #[error("get_peers reply with neither nodes nor values")]
    EmptyGetPeersReply,

    #[error("values without a token")]
    ValuesWithoutToken,

    #[error("get_peers reply to a transaction we did not send")]
    BadTagGetPeers,

    #[error("find_node reply to a transaction we did not send")]
    BadTagFindNode,

    #[error("ping reply to a transaction we did not send")]
    BadTagPing,

    #[error("message is neither a query nor a reply")]
    Incongruous,
}

impl DecodeError {
    pub fn class(&self) -> ErrorClass {
        use DecodeError::*;

        match self {
            MessageTooLong | BadChar | BadEndOfMessage | DictIsKey | NegativeInt
            | DictsTooDeep | NakedValue | RogueInt | UnexpectedList => ErrorClass::Malformed,

            PortOverflow | InconsistentType | BadLengthNodes | BadLengthTarget | BadLengthNid
            | BadLengthInfoHash | BadLengthPeer | UnknownQuery | TransactionTooLong
            | TokenTooLong | ErrorType | UnknownType | MissingNid | MissingTransaction
            | MissingInfoHash | MissingPort | MissingTarget | EmptyGetPeersReply
            | ValuesWithoutToken | Incongruous => ErrorClass::Protocol,

            TokenUnrecognized | PingBody | BadTagGetPeers | BadTagFindNode | BadTagPing => {
                ErrorClass::Policy
            }
        }
    }
}
