// Auth protocol (package: linkd.auth.v1)
// Contains: AuthService client and server, challenge and session messages.
include!(concat!(env!("OUT_DIR"), "/linkd.auth.v1.rs"));
