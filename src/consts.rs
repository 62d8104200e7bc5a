//! Framework-wide constants: runtime dispatch targets, synthetic member
//! prefixes and custom attribute names.

/// Internal name of the runtime join-point manager every rewritten site
/// dispatches through.
pub const RUNTIME_MANAGER_CLASS: &str = "org/jweave/rt/JoinPointManager";

/// `dispatch(joinPointIndex, siteHash, target, args, declaringClass)`
pub const DISPATCH_METHOD_NAME: &str = "dispatch";
pub const DISPATCH_METHOD_DESCRIPTOR: &str =
    "(IILjava/lang/Object;[Ljava/lang/Object;Ljava/lang/Class;)Ljava/lang/Object;";

/// `handlerDispatch(exception, joinPointIndex, withinClass)`
pub const HANDLER_DISPATCH_METHOD_NAME: &str = "handlerDispatch";
pub const HANDLER_DISPATCH_METHOD_DESCRIPTOR: &str =
    "(Ljava/lang/Throwable;ILjava/lang/Class;)V";

/// `mixinFor(mixinName, targetClass)` resolves the mixin instance that
/// backs an introduced method.
pub const MIXIN_FACTORY_METHOD_NAME: &str = "mixinFor";
pub const MIXIN_FACTORY_METHOD_DESCRIPTOR: &str =
    "(Ljava/lang/String;Ljava/lang/Class;)Ljava/lang/Object;";

/// Prefix of the synthetic companion holding a woven method's original body.
pub const ORIGINAL_METHOD_PREFIX: &str = "jweave$original$";

/// Prefix of the synthetic companions holding a woven constructor's body
/// tail, one per constructor descriptor.
pub const CONSTRUCTOR_BODY_PREFIX: &str = "jweave$init$body$";

/// Prefix of generated static call-site dispatch wrappers.
pub const CALL_WRAPPER_PREFIX: &str = "jweave$call$";

/// Prefixes of generated field access wrappers.
pub const GET_WRAPPER_PREFIX: &str = "jweave$get$";
pub const SET_WRAPPER_PREFIX: &str = "jweave$set$";

/// Prefix of generated constructor-call wrappers.
pub const CTOR_WRAPPER_PREFIX: &str = "jweave$new$";

/// Prefix of the synthetic static fields caching declaring `Class` refs.
pub const CLASS_CACHE_FIELD_PREFIX: &str = "jweave$class$";

/// Every framework-generated member starts with this; such members are never
/// join-point candidates.
pub const SYNTHETIC_MEMBER_PREFIX: &str = "jweave$";

/// Class attribute persisting the monotonic join-point index across weaving
/// passes. Payload: one big-endian u32.
pub const JOIN_POINT_INDEX_ATTRIBUTE: &str = "JweaveJoinPointIndex";

/// Method attribute marking an execution wrapper. Payload: one byte,
/// 0 = empty placeholder (direct passthrough), 1 = advised (dispatch body).
pub const WRAPPER_MARKER_ATTRIBUTE: &str = "JweaveWrapper";

pub const WRAPPER_STATE_PLACEHOLDER: u8 = 0;
pub const WRAPPER_STATE_ADVISED: u8 = 1;
